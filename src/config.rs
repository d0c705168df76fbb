//! Transport configuration.

use crate::error::{RelayError, Result};
use crate::payload::TAG_HEADER;

/// Production API root. Paths such as `oauth` are joined onto it.
pub const DEFAULT_API_URL: &str = "https://api.boldem.cz/api/";
pub const DEFAULT_USER_AGENT: &str = "boldem-relay BoldemApi client";

/// When a cached access token stops being reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenExpiry {
    /// Keep the first token for the lifetime of the transport.
    #[default]
    Never,
    /// Drop the token once `expires_in` (minus `leeway`) has elapsed.
    Honor { leeway: chrono::Duration },
}

#[derive(Clone)]
pub struct TransportConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    /// Headers added to every message that does not set them itself.
    pub default_headers: Vec<(String, String)>,
    pub user_agent: String,
    /// Skip TLS certificate verification. Only for test environments.
    pub accept_invalid_certs: bool,
    /// Keep a transcript of every request and response for [`history`].
    ///
    /// [`history`]: crate::BoldemTransport::history
    pub record_history: bool,
    pub token_expiry: TokenExpiry,
}

impl TransportConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: DEFAULT_API_URL.to_string(),
            default_headers: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs: false,
            record_history: false,
            token_expiry: TokenExpiry::Never,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Adds a default header, replacing an earlier default with the same name.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.default_headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.default_headers.push((name, value)),
        }
        self
    }

    pub fn with_history(mut self, record_history: bool) -> Self {
        self.record_history = record_history;
        self
    }

    pub fn with_token_expiry(mut self, token_expiry: TokenExpiry) -> Self {
        self.token_expiry = token_expiry;
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("BOLDEM_CLIENT_ID")
            .map_err(|_| RelayError::Config("BOLDEM_CLIENT_ID not set".to_string()))?;
        let client_secret = std::env::var("BOLDEM_CLIENT_SECRET")
            .map_err(|_| RelayError::Config("BOLDEM_CLIENT_SECRET not set".to_string()))?;

        let mut config = Self::new(client_id, client_secret);
        if let Ok(api_url) = std::env::var("BOLDEM_API_URL") {
            config = config.with_api_url(api_url);
        }
        if let Ok(tag) = std::env::var("BOLDEM_TAG") {
            config = config.with_default_header(TAG_HEADER, tag);
        }
        config.accept_invalid_certs = env_flag("BOLDEM_ACCEPT_INVALID_CERTS")?;
        config.record_history = env_flag("BOLDEM_RECORD_HISTORY")?;
        if env_flag("BOLDEM_HONOR_TOKEN_EXPIRY")? {
            config.token_expiry = TokenExpiry::Honor {
                leeway: chrono::Duration::seconds(60),
            };
        }
        Ok(config)
    }

    /// Joins `path` onto the API root, tolerating a missing trailing slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path)
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("api_url", &self.api_url)
            .field("default_headers", &self.default_headers)
            .field("user_agent", &self.user_agent)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("record_history", &self.record_history)
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

fn env_flag(name: &str) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(false),
        Ok(value) => parse_flag(&value)
            .ok_or_else(|| RelayError::Config(format!("{name} must be a boolean, got {value:?}"))),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = TransportConfig::new("id", "secret");
        assert_eq!(config.client_id, "id");
        assert_eq!(config.client_secret, "secret");
        assert_eq!(config.api_url, "https://api.boldem.cz/api/");
        assert!(!config.accept_invalid_certs);
        assert!(!config.record_history);
        assert_eq!(config.token_expiry, TokenExpiry::Never);
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = TransportConfig::new("id", "secret");
        assert_eq!(config.endpoint("oauth"), "https://api.boldem.cz/api/oauth");

        let config = config.with_api_url("http://127.0.0.1:8080");
        assert_eq!(
            config.endpoint("transactionalemails"),
            "http://127.0.0.1:8080/transactionalemails"
        );
    }

    #[test]
    fn test_default_header_replaces_same_name() {
        let config = TransportConfig::new("id", "secret")
            .with_default_header(TAG_HEADER, "a")
            .with_default_header("X-Source", "relay")
            .with_default_header(TAG_HEADER, "b");
        assert_eq!(
            config.default_headers,
            vec![
                (TAG_HEADER.to_string(), "b".to_string()),
                ("X-Source".to_string(), "relay".to_string()),
            ]
        );
    }

    #[test]
    fn test_debug_masks_secret() {
        let debug = format!("{:?}", TransportConfig::new("id", "hunter2"));
        assert!(debug.contains("\"id\""));
        assert!(debug.contains("***"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
