//! CalDAV adapter
//!
//! Authenticated client for listing calendars and reading/writing events over
//! the CalDAV protocol (RFC 4791). Events travel as iCalendar bodies inside
//! WebDAV resources; requests and multistatus responses are built and parsed
//! with quick-xml.

pub mod client;
pub mod ical;
pub mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::error::CalDavError;
use crate::event::CalDavEvent;
use crate::models::caldav_account::Model as CalDavAccountModel;
use crate::repositories::account::CalDavCredentials;

pub use client::HttpCalDavClient;

/// Connection material for one CalDAV endpoint, resolved per run.
pub struct CalDavSession {
    pub base_url: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub verify_tls: bool,
}

impl CalDavSession {
    pub fn new(account: &CalDavAccountModel, password: Zeroizing<String>) -> Self {
        Self {
            base_url: account.base_url.clone(),
            username: account.username.clone(),
            password,
            verify_tls: account.verify_tls,
        }
    }
}

impl From<CalDavCredentials> for CalDavSession {
    fn from(credentials: CalDavCredentials) -> Self {
        Self::new(&credentials.account, credentials.password)
    }
}

/// Discovered calendar collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInfo {
    /// Calendar identifier: the collection path relative to the server root.
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub url: String,
}

/// CalDAV operations the sync engine depends on.
#[async_trait]
pub trait CalDavAdapter: Send + Sync {
    /// Authenticate against the server's principal URL.
    async fn test_connection(&self, session: &CalDavSession) -> Result<(), CalDavError>;

    async fn discover_calendars(
        &self,
        session: &CalDavSession,
    ) -> Result<Vec<CalendarInfo>, CalDavError>;

    /// Time-range REPORT with server-side expansion of recurring events.
    async fn get_events(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalDavEvent>, CalDavError>;

    async fn create_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError>;

    /// Update looks up the existing resource by UID.
    async fn update_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError>;

    /// Idempotent: a missing resource counts as deleted.
    async fn delete_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        uid: &str,
    ) -> Result<(), CalDavError>;
}
