//! Access tokens for the Google APIs.
//!
//! Access tokens live for about an hour. [`ServiceAccountTokens`] exchanges a
//! signed service-account assertion for a token (OAuth 2.0 JWT bearer grant),
//! caches it, and mints a new one shortly before it expires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::SyncError;

const STORE: &str = "google";

/// Scope covering Sheets values, revisions and watch channels.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google accepts assertions valid for at most an hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are replaced this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Supplies the bearer token for each Google request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, SyncError>;
}

/// A fixed token, for development against short-lived credentials.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, SyncError> {
        Ok(self.token.clone())
    }
}

/// The fields of a service-account key file this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::unavailable(STORE, format!("credentials {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SyncError::unavailable(STORE, format!("credentials {}: {}", path.display(), e))
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Tokens minted from a service-account key.
pub struct ServiceAccountTokens {
    http: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(
        key: ServiceAccountKey,
        scope: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            SyncError::unavailable(STORE, format!("invalid service account key: {}", e))
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::unavailable(STORE, e))?;

        Ok(Self {
            http,
            key,
            signing_key,
            scope: scope.into(),
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, SyncError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| SyncError::unavailable(STORE, format!("signing assertion: {}", e)))
    }

    async fn mint(&self) -> Result<CachedToken, SyncError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::unavailable(
                STORE,
                format!("token exchange returned {}: {}", status, body),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::unavailable(STORE, format!("token exchange: {}", e)))?;
        tracing::debug!(expires_in = token.expires_in, "Minted Google access token");

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, SyncError> {
        let mut cached = self.cached.lock().await;
        let deadline = Utc::now() + chrono::Duration::seconds(REFRESH_MARGIN_SECS);
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > deadline) {
            return Ok(token.value.clone());
        }

        let token = self.mint().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

/// Service-account tokens when a key file is configured, either through
/// `google_credentials_path` or `GOOGLE_APPLICATION_CREDENTIALS`. Otherwise
/// the fixed `google_access_token`.
pub fn token_provider_from_config(config: &Config) -> Result<Arc<dyn TokenProvider>, SyncError> {
    let key_path = Some(config.google_credentials_path.as_str())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from));

    match key_path {
        Some(path) => {
            let key = ServiceAccountKey::from_file(&path)?;
            tracing::info!(client_email = %key.client_email, "Using service account credentials");
            Ok(Arc::new(ServiceAccountTokens::new(
                key,
                DRIVE_SCOPE,
                config.request_timeout(),
            )?))
        }
        None => {
            if config.google_access_token.is_empty() {
                tracing::warn!("No Google credentials configured; document calls will be rejected");
            }
            Ok(Arc::new(StaticToken::new(config.google_access_token.clone())))
        }
    }
}
