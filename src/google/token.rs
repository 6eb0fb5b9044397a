//! Google access token provisioning.
//!
//! The sync engine consumes a credential provider that yields a valid access
//! token or fails. The production implementation caches the stored token
//! until expiry and refreshes it against the OAuth token endpoint with the
//! persisted refresh token, re-sealing the result. The authorization flow
//! itself lives outside this service.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::GoogleConfig;
use crate::error::GoogleError;
use crate::repositories::credential::CredentialRepository;

/// Yields a valid access token for Calendar API calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<Zeroizing<String>, GoogleError>;

    /// Drop any cached token, forcing the next call to re-resolve. Called by
    /// the client when the API reports the credential revoked.
    async fn invalidate(&self);
}

/// Leeway subtracted from the recorded expiry so a token is refreshed before
/// it actually lapses mid-request.
const EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

struct CachedToken {
    token: Zeroizing<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_LEEWAY_SECS) < expires_at,
            None => true,
        }
    }
}

pub struct OAuthTokenProvider {
    config: GoogleConfig,
    credentials: CredentialRepository,
    http: Client,
    cache: Arc<Mutex<Option<CachedToken>>>,
}

impl OAuthTokenProvider {
    pub fn new(config: GoogleConfig, credentials: CredentialRepository) -> Self {
        Self {
            config,
            credentials,
            http: Client::new(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CachedToken, GoogleError> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or_else(|| GoogleError::Auth("google client id not configured".to_string()))?;
        let client_secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or_else(|| GoogleError::Auth("google client secret not configured".to_string()))?;

        let params = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| GoogleError::Protocol(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            // invalid_grant means the refresh token itself was revoked; the
            // operator has to run the authorization flow again
            return Err(GoogleError::Auth(format!(
                "token refresh failed ({status}): {} {}",
                body.error, body.error_description
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GoogleError::Protocol(format!("malformed token response: {e}")))?;

        let expires_at = body
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        self.credentials
            .store_tokens(
                &body.access_token,
                body.refresh_token.as_deref(),
                expires_at,
                None,
            )
            .await
            .map_err(|e| GoogleError::Auth(format!("failed to persist refreshed tokens: {e}")))?;

        info!(expires_at = ?expires_at, "refreshed google access token");

        Ok(CachedToken {
            token: Zeroizing::new(body.access_token),
            expires_at,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<Zeroizing<String>, GoogleError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();

        if let Some(cached) = cache.as_ref()
            && cached.is_fresh(now)
        {
            return Ok(cached.token.clone());
        }

        let stored = self
            .credentials
            .load_tokens()
            .await
            .map_err(|e| GoogleError::Auth(format!("no usable google credential: {e}")))?;

        let fresh = CachedToken {
            token: stored.access_token,
            expires_at: stored.expires_at,
        };

        let resolved = if fresh.is_fresh(now) {
            debug!("using stored google access token");
            fresh
        } else {
            let refresh_token = stored.refresh_token.ok_or_else(|| {
                GoogleError::Auth("access token expired and no refresh token stored".to_string())
            })?;
            self.refresh(&refresh_token).await?
        };

        let token = resolved.token.clone();
        *cache = Some(resolved);
        Ok(token)
    }

    async fn invalidate(&self) {
        warn!("invalidating cached google access token");
        self.cache.lock().await.take();
    }
}
