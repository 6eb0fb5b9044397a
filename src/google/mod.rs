//! Google Calendar adapter
//!
//! Authenticated client for the Calendar v3 JSON API with centralized
//! retry/backoff handling and a token provider that refreshes the stored
//! OAuth credential on expiry.

pub mod client;
pub mod token;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GoogleError;
use crate::event::GoogleEvent;

pub use client::GoogleCalendarClient;
pub use token::{AccessTokenProvider, OAuthTokenProvider};

/// One entry of the user's calendar list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleCalendarInfo {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
    pub primary: bool,
}

/// Google Calendar operations the sync engine depends on.
#[async_trait]
pub trait GoogleAdapter: Send + Sync {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarInfo>, GoogleError>;

    async fn get_calendar(&self, calendar_id: &str)
    -> Result<Option<GoogleCalendarInfo>, GoogleError>;

    /// Windowed fetch with `singleEvents=true` so recurring series arrive as
    /// expanded instances; pagination is exhausted before returning.
    async fn get_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GoogleEvent>, GoogleError>;

    /// Returns the created event as the server stored it (id, timestamps).
    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError>;

    /// Idempotent: 404/410 counts as already deleted.
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), GoogleError>;

    async fn find_events_by_uid(
        &self,
        calendar_id: &str,
        ical_uid: &str,
    ) -> Result<Vec<GoogleEvent>, GoogleError>;
}
