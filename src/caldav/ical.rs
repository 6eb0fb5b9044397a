//! iCalendar parse and serialize for CalDAV event bodies.
//!
//! Serialization goes through the `icalendar` builder. Parsing is a
//! line-based reader over unfolded RFC 5545 content lines; servers disagree
//! enough about optional properties that a tolerant reader beats a strict
//! one. Every naive datetime encountered is promoted to UTC with a logged
//! warning.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, Event as IcalEvent, EventLike};
use tracing::warn;

use crate::error::EventDataError;
use crate::event::{CalDavEvent, EventStatus};

/// Parse a VCALENDAR body into normalized events. Master events and
/// overridden instances come out as separate events linked by UID and
/// RECURRENCE-ID.
pub fn parse_events(ics: &str) -> Result<Vec<CalDavEvent>, EventDataError> {
    let lines = unfold_lines(ics);

    let mut events = Vec::new();
    let mut current: Option<Vec<(String, Option<String>, String)>> = None;

    for line in &lines {
        match line.as_str() {
            "BEGIN:VEVENT" => current = Some(Vec::new()),
            "END:VEVENT" => {
                if let Some(props) = current.take() {
                    events.push(event_from_properties(&props)?);
                }
            }
            _ => {
                if let Some(props) = current.as_mut()
                    && let Some((key, value)) = line.split_once(':')
                {
                    let (name, params) = match key.split_once(';') {
                        Some((name, params)) => (name, Some(params.to_string())),
                        None => (key, None),
                    };
                    props.push((name.to_ascii_uppercase(), params, value.to_string()));
                }
            }
        }
    }

    Ok(events)
}

/// Serialize a normalized event to a single-VEVENT VCALENDAR body.
pub fn event_to_ical(event: &CalDavEvent) -> String {
    let mut ical_event = IcalEvent::new();

    ical_event.uid(&event.uid);
    ical_event.summary(&event.summary);

    if let Some(ref description) = event.description {
        ical_event.description(description);
    }
    if let Some(ref location) = event.location {
        ical_event.location(location);
    }

    if event.all_day {
        if let Some(start) = event.start {
            ical_event.all_day(start.date_naive());
        }
        if let Some(end) = event.end {
            let mut dtend = icalendar::Property::new("DTEND", &end.format("%Y%m%d").to_string());
            dtend.add_parameter("VALUE", "DATE");
            ical_event.append_property(dtend);
        }
    } else {
        if let Some(start) = event.start {
            ical_event.starts(start);
        }
        if let Some(end) = event.end {
            ical_event.ends(end);
        }
    }

    let status_str = match event.status {
        EventStatus::Confirmed => "CONFIRMED",
        EventStatus::Tentative => "TENTATIVE",
        EventStatus::Cancelled => "CANCELLED",
    };
    ical_event.add_property("STATUS", status_str);

    if let Some(ref rrule) = event.rrule {
        ical_event.add_property("RRULE", rrule);
    }
    if let Some(ref instance) = event.recurrence_instance_id {
        ical_event.add_property("RECURRENCE-ID", instance);
    }

    // RFC 5545 wants basic ISO 8601 (20240101T120000Z); chrono's rfc3339
    // output confuses some servers
    if let Some(last_modified) = event.last_modified {
        ical_event.add_property(
            "LAST-MODIFIED",
            &last_modified.format("%Y%m%dT%H%M%SZ").to_string(),
        );
    }
    if let Some(created) = event.created {
        ical_event.timestamp(created);
        ical_event.add_property("CREATED", &created.format("%Y%m%dT%H%M%SZ").to_string());
    }

    ical_event.sequence(event.sequence.max(0) as u32);

    let mut calendar = Calendar::new();
    calendar.push(ical_event);
    calendar.to_string()
}

fn event_from_properties(
    props: &[(String, Option<String>, String)],
) -> Result<CalDavEvent, EventDataError> {
    let mut uid = None;
    let mut summary = None;
    let mut description = None;
    let mut location = None;
    let mut start = None;
    let mut end = None;
    let mut all_day = false;
    let mut timezone = None;
    let mut rrule = None;
    let mut recurrence_instance_id = None;
    let mut last_modified = None;
    let mut created = None;
    let mut sequence = 0;
    let mut status = EventStatus::Confirmed;

    for (name, params, value) in props {
        match name.as_str() {
            "UID" => uid = Some(value.clone()),
            "SUMMARY" => summary = Some(unescape_text(value)),
            "DESCRIPTION" => description = Some(unescape_text(value)),
            "LOCATION" => location = Some(unescape_text(value)),
            "DTSTART" => {
                let parsed = parse_date_or_datetime(value, params.as_deref(), "DTSTART")?;
                all_day = parsed.all_day;
                timezone = parsed.timezone;
                start = Some(parsed.instant);
            }
            "DTEND" => {
                let parsed = parse_date_or_datetime(value, params.as_deref(), "DTEND")?;
                end = Some(parsed.instant);
            }
            "RRULE" => rrule = Some(value.clone()),
            "RECURRENCE-ID" => recurrence_instance_id = Some(value.clone()),
            "LAST-MODIFIED" => last_modified = parse_utc_timestamp(value),
            "CREATED" => created = parse_utc_timestamp(value),
            "SEQUENCE" => sequence = value.parse().unwrap_or(0),
            "STATUS" => status = EventStatus::parse(value),
            _ => {}
        }
    }

    let uid = uid.ok_or_else(|| EventDataError::IcalParse("VEVENT without UID".to_string()))?;

    // Default a missing DTEND the way permissive clients do
    if end.is_none() {
        end = start.map(|s| {
            if all_day {
                s + Duration::days(1)
            } else {
                s + Duration::hours(1)
            }
        });
    }

    if all_day {
        timezone = None;
    }

    let event = CalDavEvent {
        uid,
        summary: summary.unwrap_or_default(),
        description,
        location,
        start,
        end,
        all_day,
        timezone,
        rrule,
        recurrence_instance_id,
        last_modified,
        created,
        sequence,
        status,
    };

    event.validate()?;
    Ok(event)
}

struct ParsedInstant {
    instant: DateTime<Utc>,
    timezone: Option<String>,
    all_day: bool,
}

fn parse_date_or_datetime(
    value: &str,
    params: Option<&str>,
    property: &str,
) -> Result<ParsedInstant, EventDataError> {
    let is_date = params.is_some_and(|p| p.contains("VALUE=DATE") && !p.contains("VALUE=DATE-TIME"));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| EventDataError::IcalParse(format!("invalid {property} DATE: {e}")))?;
        let instant = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| EventDataError::IcalParse(format!("invalid {property} DATE")))?;
        return Ok(ParsedInstant {
            instant,
            timezone: None,
            all_day: true,
        });
    }

    let tzid = params.and_then(extract_tzid);

    if let Some(stripped) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
            .map_err(|e| EventDataError::IcalParse(format!("invalid {property} DATE-TIME: {e}")))?;
        return Ok(ParsedInstant {
            instant: naive.and_utc(),
            timezone: Some("UTC".to_string()),
            all_day: false,
        });
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|e| EventDataError::IcalParse(format!("invalid {property} DATE-TIME: {e}")))?;

    match tzid {
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => {
                let instant = tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| naive.and_utc());
                Ok(ParsedInstant {
                    instant,
                    timezone: Some(name),
                    all_day: false,
                })
            }
            Err(_) => {
                warn!(tzid = %name, "unknown timezone in {property}, treating as UTC");
                Ok(ParsedInstant {
                    instant: naive.and_utc(),
                    timezone: Some("UTC".to_string()),
                    all_day: false,
                })
            }
        },
        None => {
            warn!("naive {property} datetime promoted to UTC");
            Ok(ParsedInstant {
                instant: naive.and_utc(),
                timezone: Some("UTC".to_string()),
                all_day: false,
            })
        }
    }
}

fn extract_tzid(params: &str) -> Option<String> {
    let start = params.find("TZID=")?;
    let rest = &params[start + 5..];
    let end = rest.find(';').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

fn parse_utc_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.strip_suffix('Z').unwrap_or(value);
    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S").ok()?;
    if !value.ends_with('Z') {
        warn!(value, "naive timestamp promoted to UTC");
    }
    Some(parsed.and_utc())
}

/// Join folded content lines (continuation lines begin with space or tab).
fn unfold_lines(ics: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();

    for raw in ics.lines() {
        let raw = raw.trim_end_matches('\r');
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
            }
        } else {
            lines.push(raw.to_string());
        }
    }

    lines
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push('\n'),
                Some(escaped) => out.push(escaped),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }

    out
}
