use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::remote::error::RemoteError;

/// Refresh when less than this much lifetime remains
const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

#[derive(Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    app_access_token: Option<String>,
    expire: Option<i64>,
}

/// Short-lived bearer token and its absolute expiry
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while the remaining lifetime exceeds `margin`
    fn is_fresh(&self, margin: Duration) -> bool {
        Utc::now() + margin < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Obtains and refreshes the app access token.
///
/// Refresh is single-flight: callers that find the token stale queue on
/// `refresh_lock`, and whoever gets it second re-checks before going to the
/// network, so one refresh serves every waiter.
pub struct CredentialBroker {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    safety_margin: Duration,
    current: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl CredentialBroker {
    pub fn new(client: Client, base_url: &str, app_id: String, app_secret: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            app_secret,
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Get a usable token, refreshing it if it is missing or close to expiry
    pub async fn get_credential(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.fresh_token().await {
            debug!("Token refreshed by a concurrent caller");
            return Ok(token);
        }

        info!("Access token missing or expiring, requesting a new one");
        let credential = self.refresh().await?;
        let token = credential.token.clone();
        *self.current.write().await = Some(credential);
        Ok(token)
    }

    /// Expiry of the current token, if one has been fetched
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.read().await.as_ref().map(|c| c.expires_at)
    }

    /// Drop the cached token so the next call refreshes
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    async fn fresh_token(&self) -> Option<String> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|c| c.is_fresh(self.safety_margin))
            .map(|c| c.token.clone())
    }

    async fn refresh(&self) -> Result<Credential, RemoteError> {
        let url = format!("{}/auth/v3/app_access_token/internal", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                app_id: &self.app_id,
                app_secret: &self.app_secret,
            })
            .send()
            .await
            .map_err(|e| RemoteError::Auth(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("✗ Token request returned {}", status);
            return Err(RemoteError::Auth(format!(
                "Token request failed with status {}: {}",
                status, body
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Auth(format!("Malformed token response: {}", e)))?;

        if payload.code != 0 {
            warn!("✗ Token request rejected: {} {}", payload.code, payload.msg);
            return Err(RemoteError::Auth(format!(
                "Token request rejected ({}): {}",
                payload.code, payload.msg
            )));
        }

        let (token, expire) = match (payload.app_access_token, payload.expire) {
            (Some(token), Some(expire)) if !token.is_empty() => (token, expire),
            _ => {
                return Err(RemoteError::Auth(
                    "Token response missing app_access_token or expire".to_string(),
                ))
            }
        };

        let expires_at = Duration::try_seconds(expire)
            .filter(|lifetime| *lifetime > Duration::zero())
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                warn!("✗ Token response has invalid expire: {}", expire);
                RemoteError::Auth("Token response has invalid expire".to_string())
            })?;
        info!(
            "✓ Access token refreshed, valid until {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(Credential::new(token, expires_at))
    }
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}
