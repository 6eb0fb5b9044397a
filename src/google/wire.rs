//! Calendar v3 wire types and their mapping onto the normalized model.
//!
//! Only the fields the sync core consumes are modeled; anything else the API
//! returns is dropped at deserialization time by virtue of not being
//! declared here. Round-trip fidelity for unrecognized fields is an explicit
//! non-goal.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EventStatus, GoogleEvent};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "iCalUID", skip_serializing_if = "Option::is_none")]
    pub ical_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_start_time: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventListResponse {
    pub items: Vec<EventResource>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub time_zone: Option<String>,
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarListResponse {
    pub items: Vec<CalendarListEntry>,
    pub next_page_token: Option<String>,
}

impl EventDateTime {
    fn instant(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = self.date_time {
            return Some(dt.with_timezone(&Utc));
        }
        self.date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    fn from_timed(instant: DateTime<Utc>, time_zone: Option<&str>) -> Self {
        Self {
            date: None,
            date_time: Some(instant.into()),
            time_zone: time_zone.map(str::to_string),
        }
    }

    fn from_all_day(instant: DateTime<Utc>) -> Self {
        Self {
            date: Some(instant.date_naive()),
            date_time: None,
            time_zone: None,
        }
    }
}

impl EventResource {
    /// Map the wire shape onto the normalized model.
    pub fn into_event(self) -> GoogleEvent {
        let all_day = self
            .start
            .as_ref()
            .is_some_and(|start| start.date.is_some());

        let timezone = if all_day {
            None
        } else {
            self.start
                .as_ref()
                .and_then(|start| start.time_zone.clone())
                .or_else(|| Some("UTC".to_string()))
        };

        // Pair expanded/overridden instances with the CalDAV RECURRENCE-ID
        // by rendering the original start in UTC basic format
        let recurrence_instance_id = self
            .original_start_time
            .as_ref()
            .and_then(EventDateTime::instant)
            .map(|dt| dt.format("%Y%m%dT%H%M%SZ").to_string());

        GoogleEvent {
            start: self.start.as_ref().and_then(EventDateTime::instant),
            end: self.end.as_ref().and_then(EventDateTime::instant),
            id: self.id,
            ical_uid: self.ical_uid,
            summary: self.summary.unwrap_or_default(),
            description: self.description,
            location: self.location,
            all_day,
            timezone,
            recurrence: self.recurrence,
            recurrence_instance_id,
            updated: self.updated,
            created: self.created,
            sequence: self.sequence.unwrap_or(0),
            status: EventStatus::parse(self.status.as_deref().unwrap_or("confirmed")),
        }
    }

    /// Build the insert/update request body for a normalized event.
    pub fn from_event(event: &GoogleEvent) -> Self {
        let (start, end) = if event.all_day {
            (
                event.start.map(EventDateTime::from_all_day),
                event.end.map(EventDateTime::from_all_day),
            )
        } else {
            (
                event
                    .start
                    .map(|dt| EventDateTime::from_timed(dt, event.timezone.as_deref())),
                event
                    .end
                    .map(|dt| EventDateTime::from_timed(dt, event.timezone.as_deref())),
            )
        };

        Self {
            id: event.id.clone(),
            ical_uid: event.ical_uid.clone(),
            status: Some(event.status.as_str().to_string()),
            summary: Some(event.summary.clone()),
            description: event.description.clone(),
            location: event.location.clone(),
            start,
            end,
            recurrence: event.recurrence.clone(),
            recurring_event_id: None,
            original_start_time: None,
            sequence: (event.sequence > 0).then_some(event.sequence),
            created: None,
            updated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timed_event_deserializes_and_normalizes() {
        let json = serde_json::json!({
            "id": "abc123",
            "iCalUID": "uid-1@example.com",
            "status": "confirmed",
            "summary": "Meeting",
            "start": {"dateTime": "2025-01-15T09:00:00-05:00", "timeZone": "America/New_York"},
            "end": {"dateTime": "2025-01-15T10:00:00-05:00", "timeZone": "America/New_York"},
            "updated": "2025-01-14T12:00:00.000Z",
            "sequence": 2,
            "htmlLink": "https://calendar.google.com/ignored"
        });

        let resource: EventResource = serde_json::from_value(json).expect("deserializes");
        let event = resource.into_event();

        assert_eq!(event.id.as_deref(), Some("abc123"));
        assert_eq!(event.uid(), "uid-1@example.com");
        assert!(!event.all_day);
        assert_eq!(event.timezone.as_deref(), Some("America/New_York"));
        assert_eq!(
            event.start,
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap())
        );
        assert_eq!(event.sequence, 2);
    }

    #[test]
    fn all_day_event_uses_date_fields() {
        let json = serde_json::json!({
            "id": "day1",
            "summary": "Holiday",
            "start": {"date": "2025-01-20"},
            "end": {"date": "2025-01-21"}
        });

        let resource: EventResource = serde_json::from_value(json).expect("deserializes");
        let event = resource.into_event();

        assert!(event.all_day);
        assert!(event.timezone.is_none());
        assert_eq!(
            event.start,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn expanded_instance_gets_caldav_compatible_key() {
        let json = serde_json::json!({
            "id": "abc123_20250115T140000Z",
            "iCalUID": "series-1",
            "summary": "Standup",
            "recurringEventId": "abc123",
            "originalStartTime": {"dateTime": "2025-01-15T09:00:00-05:00"},
            "start": {"dateTime": "2025-01-15T10:00:00-05:00"},
            "end": {"dateTime": "2025-01-15T10:15:00-05:00"}
        });

        let resource: EventResource = serde_json::from_value(json).expect("deserializes");
        let event = resource.into_event();

        assert_eq!(
            event.recurrence_instance_id.as_deref(),
            Some("20250115T140000Z")
        );
        assert_eq!(event.sync_key(), "series-1#20250115T140000Z");
    }

    #[test]
    fn request_body_round_trips_core_fields() {
        let event = GoogleEvent {
            id: None,
            ical_uid: Some("uid-9".to_string()),
            summary: "Review".to_string(),
            description: Some("notes".to_string()),
            location: Some("HQ".to_string()),
            start: Some(Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 2, 1, 9, 30, 0).unwrap()),
            all_day: false,
            timezone: Some("UTC".to_string()),
            recurrence: Some(vec!["RRULE:FREQ=WEEKLY".to_string()]),
            recurrence_instance_id: None,
            updated: None,
            created: None,
            sequence: 1,
            status: EventStatus::Confirmed,
        };

        let body = EventResource::from_event(&event);
        let json = serde_json::to_value(&body).expect("serializes");

        assert_eq!(json["iCalUID"], "uid-9");
        assert_eq!(json["summary"], "Review");
        assert_eq!(json["recurrence"][0], "RRULE:FREQ=WEEKLY");
        assert!(json["start"]["dateTime"].is_string());
        assert!(json.get("created").is_none());

        let back = serde_json::from_value::<EventResource>(json)
            .expect("round-trips")
            .into_event();
        assert_eq!(back.content_hash(), event.content_hash());
    }
}
