//! Bidirectional translation between the CalDAV and Google event flavors.
//!
//! Field-for-field copies plus the representation differences: recurrence
//! syntax (`RRULE:` prefix list on the Google side), all-day semantics and
//! timezone attachment.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::event::{CalDavEvent, GoogleEvent};

/// Convert a CalDAV-flavored event into its Google flavor.
pub fn caldav_to_google(event: &CalDavEvent) -> GoogleEvent {
    GoogleEvent {
        id: None,
        ical_uid: Some(event.uid.clone()),
        summary: event.summary.clone(),
        description: event.description.clone(),
        location: event.location.clone(),
        start: event.start,
        end: event.end,
        all_day: event.all_day,
        timezone: event.timezone.clone(),
        recurrence: event.rrule.as_ref().map(|rule| vec![format!("RRULE:{rule}")]),
        recurrence_instance_id: event.recurrence_instance_id.clone(),
        updated: event.last_modified,
        created: event.created,
        sequence: event.sequence,
        status: event.status,
    }
}

/// Convert a Google-flavored event into its CalDAV flavor.
pub fn google_to_caldav(event: &GoogleEvent) -> CalDavEvent {
    CalDavEvent {
        uid: event.uid().to_string(),
        summary: event.summary.clone(),
        description: event.description.clone(),
        location: event.location.clone(),
        start: event.start,
        end: event.end,
        all_day: event.all_day,
        timezone: event.timezone.clone(),
        rrule: event.rrule().map(str::to_string),
        recurrence_instance_id: event.recurrence_instance_id.clone(),
        last_modified: event.updated,
        created: event.created,
        sequence: event.sequence,
        status: event.status,
    }
}

/// Attach a zone to a naive local instant and express it in UTC. An unknown
/// zone falls back to UTC with a warning; no zone means UTC.
pub fn normalize_timezone(naive: NaiveDateTime, target: Option<&str>) -> DateTime<Utc> {
    let Some(name) = target else {
        return naive.and_utc();
    };

    match name.parse::<Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
        Err(_) => {
            warn!(timezone = name, "unknown timezone, using UTC");
            naive.and_utc()
        }
    }
}

/// Pin all-day bounds to midnight of their day.
pub fn normalize_all_day(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let to_midnight = |dt: DateTime<Utc>| {
        dt.with_hour(0)
            .and_then(|dt| dt.with_minute(0))
            .and_then(|dt| dt.with_second(0))
            .and_then(|dt| dt.with_nanosecond(0))
            .unwrap_or(dt)
    };
    (to_midnight(start), to_midnight(end))
}

/// Consistency issues for a CalDAV-flavored event; empty iff the event may
/// be persisted.
pub fn validate_caldav(event: &CalDavEvent) -> Vec<String> {
    let mut issues = common_issues(
        &event.summary,
        event.start,
        event.end,
        event.all_day,
        event.timezone.as_deref(),
    );
    if event.uid.is_empty() {
        issues.push("event UID is required".to_string());
    }
    if event.rrule.is_some() && event.recurrence_instance_id.is_some() {
        issues.push("event cannot carry both a recurrence rule and an instance id".to_string());
    }
    issues
}

/// Consistency issues for a Google-flavored event.
pub fn validate_google(event: &GoogleEvent) -> Vec<String> {
    let mut issues = common_issues(
        &event.summary,
        event.start,
        event.end,
        event.all_day,
        event.timezone.as_deref(),
    );
    if event.uid().is_empty() {
        issues.push("event must carry an iCalUID or an event id".to_string());
    }
    if event.rrule().is_some() && event.recurrence_instance_id.is_some() {
        issues.push("event cannot carry both recurrence rules and an instance id".to_string());
    }
    issues
}

fn common_issues(
    summary: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
    timezone: Option<&str>,
) -> Vec<String> {
    let mut issues = Vec::new();

    if summary.trim().is_empty() {
        issues.push("event summary is required".to_string());
    }

    if all_day {
        if timezone.is_some() {
            issues.push("all-day events must not carry a timezone".to_string());
        }
        for (name, bound) in [("start", start), ("end", end)] {
            if let Some(dt) = bound
                && (dt.hour() != 0 || dt.minute() != 0 || dt.second() != 0)
            {
                issues.push(format!("all-day {name} must be at midnight"));
            }
        }
    } else {
        match (start, end) {
            (Some(start), Some(end)) => {
                if start >= end {
                    issues.push("event start must be before end".to_string());
                }
            }
            _ => issues.push("timed events must have start and end instants".to_string()),
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStatus;
    use chrono::{NaiveDate, TimeZone};

    fn google_event() -> GoogleEvent {
        GoogleEvent {
            id: Some("g-1".to_string()),
            ical_uid: Some("uid-1".to_string()),
            summary: "Planning".to_string(),
            description: Some("agenda".to_string()),
            location: Some("HQ".to_string()),
            start: Some(Utc.with_ymd_and_hms(2025, 3, 3, 13, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 3, 3, 14, 0, 0).unwrap()),
            all_day: false,
            timezone: Some("Europe/Berlin".to_string()),
            recurrence: Some(vec![
                "EXDATE:20250310T130000Z".to_string(),
                "RRULE:FREQ=WEEKLY;BYDAY=MO".to_string(),
            ]),
            recurrence_instance_id: None,
            updated: Some(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()),
            created: Some(Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()),
            sequence: 4,
            status: EventStatus::Confirmed,
        }
    }

    #[test]
    fn google_to_caldav_extracts_first_rrule_line() {
        let caldav = google_to_caldav(&google_event());
        assert_eq!(caldav.rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(caldav.uid, "uid-1");
        assert_eq!(caldav.last_modified, google_event().updated);
    }

    #[test]
    fn caldav_to_google_wraps_rrule() {
        let caldav = google_to_caldav(&google_event());
        let back = caldav_to_google(&caldav);
        assert_eq!(
            back.recurrence,
            Some(vec!["RRULE:FREQ=WEEKLY;BYDAY=MO".to_string()])
        );
    }

    #[test]
    fn round_trip_preserves_content_hash() {
        let original = google_event();
        let round_tripped = caldav_to_google(&google_to_caldav(&original));
        assert_eq!(round_tripped.content_hash(), original.content_hash());
    }

    #[test]
    fn normalize_timezone_attaches_known_zone() {
        let naive = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();

        let instant = normalize_timezone(naive, Some("America/New_York"));
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap());
    }

    #[test]
    fn normalize_timezone_unknown_zone_is_utc() {
        let naive = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();

        let instant = normalize_timezone(naive, Some("Atlantis/Central"));
        assert_eq!(instant, naive.and_utc());
    }

    #[test]
    fn normalize_all_day_pins_midnight() {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 12).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 16, 17, 0, 0).unwrap();

        let (start, end) = normalize_all_day(start, end);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn validate_flags_empty_summary() {
        let mut event = google_event();
        event.summary = "  ".to_string();
        let issues = validate_google(&event);
        assert!(issues.iter().any(|issue| issue.contains("summary")));
    }

    #[test]
    fn validate_clean_event_has_no_issues() {
        let caldav = google_to_caldav(&google_event());
        assert!(validate_caldav(&caldav).is_empty());
    }
}
