//! SeaORM entity models, one per table of the persisted state layout.

pub mod caldav_account;
pub mod event_mapping;
pub mod mapping;
pub mod oauth_credential;
pub mod sync_log;
pub mod webhook_retry;
