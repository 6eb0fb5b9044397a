//! Normalized in-memory event model
//!
//! Wire formats on both sides are squashed into two flavored structs that
//! share one content-hash routine. The hash is computed over normalized
//! fields, never raw wire bytes, so identical semantic content on both sides
//! yields the identical digest.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EventDataError;

/// Direction a mapping syncs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    CaldavToGoogle,
    GoogleToCaldav,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CaldavToGoogle => "caldav_to_google",
            Self::GoogleToCaldav => "google_to_caldav",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "caldav_to_google" => Some(Self::CaldavToGoogle),
            "google_to_caldav" => Some(Self::GoogleToCaldav),
            "bidirectional" => Some(Self::Bidirectional),
            _ => None,
        }
    }

    pub fn writes_google(self) -> bool {
        matches!(self, Self::CaldavToGoogle | Self::Bidirectional)
    }

    pub fn writes_caldav(self) -> bool {
        matches!(self, Self::GoogleToCaldav | Self::Bidirectional)
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event status shared by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire status, defaulting to confirmed for unknown values.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "tentative" => Self::Tentative,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Confirmed,
        }
    }
}

/// CalDAV-flavored normalized event.
#[derive(Debug, Clone, PartialEq)]
pub struct CalDavEvent {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    /// IANA timezone name; present iff the event is not all-day.
    pub timezone: Option<String>,
    /// Recurrence rule in RFC 5545 RRULE syntax, without the `RRULE:` prefix.
    pub rrule: Option<String>,
    /// RECURRENCE-ID of an overridden instance of a series.
    pub recurrence_instance_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub sequence: i32,
    pub status: EventStatus,
}

impl CalDavEvent {
    /// Key used to pair events across sides. Overridden instances get their
    /// own key so they diff independently of the master.
    pub fn sync_key(&self) -> String {
        sync_key(&self.uid, self.recurrence_instance_id.as_deref())
    }

    pub fn is_recurring(&self) -> bool {
        self.rrule.is_some()
    }

    pub fn is_override(&self) -> bool {
        self.recurrence_instance_id.is_some()
    }

    pub fn content_hash(&self) -> String {
        content_hash(HashFields {
            uid: &self.uid,
            summary: &self.summary,
            description: self.description.as_deref(),
            location: self.location.as_deref(),
            start: self.start,
            end: self.end,
            all_day: self.all_day,
            timezone: self.timezone.as_deref(),
            rrule: self.rrule.as_deref(),
            recurrence_instance_id: self.recurrence_instance_id.as_deref(),
        })
    }

    /// Construction invariants. Parsers refuse events failing these.
    pub fn validate(&self) -> Result<(), EventDataError> {
        validate_common(
            &self.uid,
            &self.summary,
            self.start,
            self.end,
            self.all_day,
            self.timezone.as_deref(),
        )?;
        if self.rrule.is_some() && self.recurrence_instance_id.is_some() {
            return Err(EventDataError::invalid(
                &self.uid,
                "event cannot carry both a recurrence rule and a recurrence instance id",
            ));
        }
        Ok(())
    }
}

/// Google-flavored normalized event.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleEvent {
    /// Google Calendar event id; absent until the event exists on Google.
    pub id: Option<String>,
    /// iCalendar UID carried in the `iCalUID` field.
    pub ical_uid: Option<String>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub timezone: Option<String>,
    /// Google recurrence list, e.g. `["RRULE:FREQ=WEEKLY"]`.
    pub recurrence: Option<Vec<String>>,
    /// Instance key for expanded/overridden instances, derived from the
    /// wire `originalStartTime` in UTC basic format so it pairs with the
    /// CalDAV RECURRENCE-ID.
    pub recurrence_instance_id: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub sequence: i32,
    pub status: EventStatus,
}

impl GoogleEvent {
    /// Stable UID: `iCalUID`, falling back to the Google event id.
    pub fn uid(&self) -> &str {
        self.ical_uid
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_default()
    }

    pub fn sync_key(&self) -> String {
        sync_key(self.uid(), self.recurrence_instance_id.as_deref())
    }

    /// First `RRULE:` line of the recurrence list, without the prefix.
    pub fn rrule(&self) -> Option<&str> {
        self.recurrence
            .as_deref()?
            .iter()
            .find_map(|line| line.strip_prefix("RRULE:"))
    }

    pub fn is_recurring(&self) -> bool {
        self.rrule().is_some()
    }

    pub fn is_override(&self) -> bool {
        self.recurrence_instance_id.is_some()
    }

    pub fn content_hash(&self) -> String {
        content_hash(HashFields {
            uid: self.uid(),
            summary: &self.summary,
            description: self.description.as_deref(),
            location: self.location.as_deref(),
            start: self.start,
            end: self.end,
            all_day: self.all_day,
            timezone: self.timezone.as_deref(),
            rrule: self.rrule(),
            recurrence_instance_id: self.recurrence_instance_id.as_deref(),
        })
    }

    pub fn validate(&self) -> Result<(), EventDataError> {
        let uid = self.uid().to_string();
        if uid.is_empty() {
            return Err(EventDataError::invalid(
                "<unknown>",
                "event must carry an iCalUID or an event id",
            ));
        }
        validate_common(
            &uid,
            &self.summary,
            self.start,
            self.end,
            self.all_day,
            self.timezone.as_deref(),
        )?;
        if self.rrule().is_some() && self.recurrence_instance_id.is_some() {
            return Err(EventDataError::invalid(
                uid,
                "event cannot carry both recurrence rules and an instance id",
            ));
        }
        Ok(())
    }
}

fn sync_key(uid: &str, instance: Option<&str>) -> String {
    match instance {
        Some(instance) => format!("{uid}#{instance}"),
        None => uid.to_string(),
    }
}

fn validate_common(
    uid: &str,
    summary: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
    timezone: Option<&str>,
) -> Result<(), EventDataError> {
    if uid.is_empty() {
        return Err(EventDataError::invalid("<unknown>", "event UID is required"));
    }
    if summary.trim().is_empty() {
        return Err(EventDataError::invalid(uid, "event summary is required"));
    }

    if all_day {
        for (name, bound) in [("start", start), ("end", end)] {
            if let Some(dt) = bound {
                if dt.hour() != 0 || dt.minute() != 0 || dt.second() != 0 {
                    return Err(EventDataError::invalid(
                        uid,
                        format!("all-day {name} must be at midnight"),
                    ));
                }
            }
        }
        if timezone.is_some() {
            return Err(EventDataError::invalid(
                uid,
                "all-day events must not carry a timezone",
            ));
        }
    } else {
        let (Some(start), Some(end)) = (start, end) else {
            return Err(EventDataError::invalid(
                uid,
                "timed events must have start and end instants",
            ));
        };
        if start >= end {
            return Err(EventDataError::invalid(uid, "event start must be before end"));
        }
    }

    Ok(())
}

struct HashFields<'a> {
    uid: &'a str,
    summary: &'a str,
    description: Option<&'a str>,
    location: Option<&'a str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
    timezone: Option<&'a str>,
    rrule: Option<&'a str>,
    recurrence_instance_id: Option<&'a str>,
}

/// SHA-256 over a fixed delimited concatenation of normalized fields.
fn content_hash(fields: HashFields<'_>) -> String {
    let format_instant = |dt: Option<DateTime<Utc>>| {
        dt.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    };

    let parts = [
        fields.uid.to_string(),
        fields.summary.to_string(),
        fields.description.unwrap_or_default().to_string(),
        fields.location.unwrap_or_default().to_string(),
        format_instant(fields.start),
        format_instant(fields.end),
        fields.all_day.to_string(),
        fields.timezone.unwrap_or_default().to_string(),
        fields.rrule.unwrap_or_default().to_string(),
        fields.recurrence_instance_id.unwrap_or_default().to_string(),
    ];

    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}
