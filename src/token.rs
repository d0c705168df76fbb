//! OAuth2 client-credentials token handling.
//!
//! The token is fetched lazily on first use and then reused. With
//! [`TokenExpiry::Honor`] the `expires_in` reported by the provider is
//! respected; by default it is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::config::TokenExpiry;
use crate::error::{RelayError, Result};

const OAUTH_PATH: &str = "oauth";

/// Client id and secret used for the token exchange.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct TokenManager {
    credentials: Credentials,
    expiry: TokenExpiry,
    token: Option<CachedToken>,
}

impl TokenManager {
    pub fn new(credentials: Credentials, expiry: TokenExpiry) -> Self {
        Self {
            credentials,
            expiry,
            token: None,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Replaces the credentials. An already cached token is kept.
    pub fn set_credentials(&mut self, client_id: impl Into<String>, client_secret: impl Into<String>) {
        self.credentials = Credentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        };
    }

    /// Installs a token obtained elsewhere. It never expires.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(CachedToken {
            value: token.into(),
            expires_at: None,
        });
    }

    pub fn clear(&mut self) {
        self.token = None;
    }

    /// The cached token, if it is still usable.
    pub fn cached(&self) -> Option<&str> {
        let token = self.token.as_ref()?;
        let usable = match (self.expiry, token.expires_at) {
            (TokenExpiry::Honor { leeway }, Some(expires_at)) => Utc::now() + leeway < expires_at,
            _ => true,
        };
        usable.then_some(token.value.as_str())
    }

    /// Returns the cached token, acquiring a new one when there is none.
    pub async fn get_token(&mut self, client: &ApiClient) -> Result<String> {
        if let Some(token) = self.cached() {
            return Ok(token.to_string());
        }
        self.acquire(client).await
    }

    /// Exchanges the credentials for a fresh token and caches it.
    ///
    /// On success the token also becomes the client's default bearer.
    /// On failure the cache is left empty.
    pub async fn acquire(&mut self, client: &ApiClient) -> Result<String> {
        self.token = None;

        let response = client.post_json(OAUTH_PATH, &self.credentials, None).await?;
        if !response.is_ok() {
            warn!(status = %response.status, "Boldem token request rejected");
            return Err(RelayError::Auth(format!(
                "token endpoint returned {}: {}",
                response.status, response.body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|err| RelayError::Auth(format!("unreadable token response: {err}")))?;
        let Some(access_token) = parsed.access_token else {
            return Err(RelayError::Auth(
                "token response has no access_token".to_string(),
            ));
        };

        let now = Utc::now();
        let expires_at = parsed.expires_in.as_ref().and_then(|v| expires_at(now, v));
        info!(expires_at = ?expires_at, "Obtained Boldem access token");

        client.set_bearer(Some(access_token.clone()));
        self.token = Some(CachedToken {
            value: access_token.clone(),
            expires_at,
        });
        Ok(access_token)
    }
}

/// Interprets `expires_in` as seconds from `now` or as an RFC 3339 timestamp.
fn expires_at(now: DateTime<Utc>, expires_in: &serde_json::Value) -> Option<DateTime<Utc>> {
    let seconds = match expires_in {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => {
            if let Ok(at) = DateTime::parse_from_rfc3339(s.trim()) {
                return Some(at.with_timezone(&Utc));
            }
            s.trim().parse::<i64>().ok()
        }
        _ => None,
    }?;
    now.checked_add_signed(chrono::Duration::try_seconds(seconds)?)
}
