//! CalDAV account repository
//!
//! Loads account rows and seals/opens their password ciphertext. The
//! decrypted password never leaves this module except inside a
//! [`CalDavCredentials`] handed to the CalDAV adapter.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CryptoKey, account_aad, open_secret, seal_secret};
use crate::models::caldav_account::{self, Entity as CaldavAccount};
use crate::repositories::RepoError;

/// Decrypted connection material for one CalDAV endpoint.
pub struct CalDavCredentials {
    pub account: caldav_account::Model,
    pub password: Zeroizing<String>,
}

#[derive(Clone)]
pub struct AccountRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl AccountRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<caldav_account::Model>, RepoError> {
        Ok(CaldavAccount::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<caldav_account::Model>, RepoError> {
        Ok(CaldavAccount::find()
            .filter(caldav_account::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?)
    }

    /// Load an account and decrypt its password for adapter use.
    pub async fn load_credentials(&self, id: Uuid) -> Result<CalDavCredentials, RepoError> {
        let account = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("caldav account {id}")))?;

        let aad = account_aad(account.id);
        let password = open_secret(&self.crypto_key, &aad, &account.password_ciphertext)?;

        Ok(CalDavCredentials {
            account,
            password: Zeroizing::new(password),
        })
    }

    /// Create an account, sealing the password against the new row id.
    pub async fn create(
        &self,
        name: &str,
        username: &str,
        password: &str,
        base_url: &str,
        verify_tls: bool,
    ) -> Result<caldav_account::Model, RepoError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let ciphertext = seal_secret(&self.crypto_key, &account_aad(id), password)?;

        let model = caldav_account::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            username: Set(username.to_string()),
            password_ciphertext: Set(ciphertext),
            base_url: Set(base_url.to_string()),
            verify_tls: Set(verify_tls),
            enabled: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Replace an account's password ciphertext.
    pub async fn set_password(&self, id: Uuid, password: &str) -> Result<(), RepoError> {
        let ciphertext = seal_secret(&self.crypto_key, &account_aad(id), password)?;
        let now = Utc::now();

        let model = caldav_account::ActiveModel {
            id: Set(id),
            password_ciphertext: Set(ciphertext),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        model.update(self.db.as_ref()).await?;

        Ok(())
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<(), RepoError> {
        let model = caldav_account::ActiveModel {
            id: Set(id),
            enabled: Set(enabled),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        model.update(self.db.as_ref()).await?;
        Ok(())
    }
}
