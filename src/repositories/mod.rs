//! Data access layer.
//!
//! Repositories encapsulate SeaORM operations per entity. Transactions are
//! short-lived and opened per logical write; no transaction spans an HTTP
//! call. Credential plaintext exists only inside the account and credential
//! repositories.

pub mod account;
pub mod credential;
pub mod event_mapping;
pub mod mapping;
pub mod sync_log;
pub mod webhook_retry;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::SyncRunError;

/// Failures surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<RepoError> for SyncRunError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Db(e) => Self::Db(e),
            RepoError::Crypto(e) => Self::Credential(e.to_string()),
            RepoError::NotFound(what) => Self::Mapping(format!("{what} not found")),
        }
    }
}
