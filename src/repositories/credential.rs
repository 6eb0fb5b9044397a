//! Google OAuth credential repository
//!
//! Manages the single credential row: decrypting tokens for the token
//! provider and re-sealing them after a refresh.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CryptoKey, oauth_aad, open_secret, seal_secret};
use crate::models::oauth_credential::{self, Entity as OauthCredential};
use crate::repositories::RepoError;

/// Decrypted OAuth token material.
pub struct DecryptedTokens {
    pub credential_id: Uuid,
    pub access_token: Zeroizing<String>,
    pub refresh_token: Option<Zeroizing<String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct CredentialRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// The process-wide credential row, if OAuth has completed at least once.
    pub async fn get(&self) -> Result<Option<oauth_credential::Model>, RepoError> {
        Ok(OauthCredential::find().one(self.db.as_ref()).await?)
    }

    pub async fn load_tokens(&self) -> Result<DecryptedTokens, RepoError> {
        let row = self
            .get()
            .await?
            .ok_or_else(|| RepoError::NotFound("google oauth credential".to_string()))?;

        let aad = oauth_aad(row.id);
        let access_token = open_secret(&self.crypto_key, &aad, &row.access_token_ciphertext)?;
        let refresh_token = row
            .refresh_token_ciphertext
            .as_deref()
            .map(|ct| open_secret(&self.crypto_key, &aad, ct))
            .transpose()?;

        Ok(DecryptedTokens {
            credential_id: row.id,
            access_token: Zeroizing::new(access_token),
            refresh_token: refresh_token.map(Zeroizing::new),
            expires_at: row.expires_at.map(|dt| dt.with_timezone(&Utc)),
        })
    }

    /// Create or replace the credential row with freshly sealed tokens.
    pub async fn store_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        scopes: Option<&[String]>,
    ) -> Result<oauth_credential::Model, RepoError> {
        let now = Utc::now();
        let scopes_json = scopes.map(|s| serde_json::json!(s));

        match self.get().await? {
            Some(existing) => {
                let aad = oauth_aad(existing.id);
                let model = oauth_credential::ActiveModel {
                    id: Set(existing.id),
                    access_token_ciphertext: Set(seal_secret(&self.crypto_key, &aad, access_token)?),
                    refresh_token_ciphertext: Set(refresh_token
                        .map(|t| seal_secret(&self.crypto_key, &aad, t))
                        .transpose()?
                        .or(existing.refresh_token_ciphertext)),
                    expires_at: Set(expires_at.map(Into::into)),
                    scopes: Set(scopes_json.or(existing.scopes)),
                    updated_at: Set(now.into()),
                    ..Default::default()
                };
                Ok(model.update(self.db.as_ref()).await?)
            }
            None => {
                let id = Uuid::new_v4();
                let aad = oauth_aad(id);
                let model = oauth_credential::ActiveModel {
                    id: Set(id),
                    access_token_ciphertext: Set(seal_secret(&self.crypto_key, &aad, access_token)?),
                    refresh_token_ciphertext: Set(refresh_token
                        .map(|t| seal_secret(&self.crypto_key, &aad, t))
                        .transpose()?),
                    expires_at: Set(expires_at.map(Into::into)),
                    scopes: Set(scopes_json),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                Ok(model.insert(self.db.as_ref()).await?)
            }
        }
    }
}
