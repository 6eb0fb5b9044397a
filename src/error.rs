//! Error taxonomy for the sync service.
//!
//! Each adapter fails with its own discriminated enum so retry policies and
//! the engine can inspect the variant instead of string-matching. A run-level
//! failure is always one of the `SyncRunError` variants; per-change failures
//! are accumulated in the run's error list and never abort the run.

use thiserror::Error;

/// Failures surfaced by the CalDAV adapter.
#[derive(Debug, Error)]
pub enum CalDavError {
    #[error("caldav connection failed: {0}")]
    Connection(String),

    #[error("caldav authentication failed: {0}")]
    Auth(String),

    #[error("caldav resource not found: {0}")]
    NotFound(String),

    #[error("caldav protocol error: {0}")]
    Protocol(String),
}

impl CalDavError {
    /// Classify an HTTP status returned by a CalDAV server.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{context}: HTTP {status}")),
            404 | 410 => Self::NotFound(format!("{context}: HTTP {status}")),
            _ => Self::Protocol(format!("{context}: HTTP {status}")),
        }
    }
}

impl From<reqwest::Error> for CalDavError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Failures surfaced by the Google Calendar adapter.
#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("google authentication failed: {0}")]
    Auth(String),

    #[error("google rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("google resource not found: {0}")]
    NotFound(String),

    #[error("google protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for GoogleError {
    fn from(err: reqwest::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// A failure that aborts an entire sync run (global prerequisites: mapping
/// resolution, credentials, window fetch).
#[derive(Debug, Error)]
pub enum SyncRunError {
    #[error("mapping error: {0}")]
    Mapping(String),

    #[error(transparent)]
    CalDav(#[from] CalDavError),

    #[error(transparent)]
    Google(#[from] GoogleError),

    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("sync cancelled")]
    Cancelled,
}

/// Failures while parsing or validating event data. These are per-change
/// errors: the offending UID is logged and the run moves on.
#[derive(Debug, Error)]
pub enum EventDataError {
    #[error("event {uid}: {message}")]
    Invalid { uid: String, message: String },

    #[error("failed to parse icalendar data: {0}")]
    IcalParse(String),
}

impl EventDataError {
    pub fn invalid<U: Into<String>, M: Into<String>>(uid: U, message: M) -> Self {
        Self::Invalid {
            uid: uid.into(),
            message: message.into(),
        }
    }
}
