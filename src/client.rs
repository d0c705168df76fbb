//! Thin HTTP client for the Boldem API.
//!
//! Non-2xx responses are returned, not raised: callers inspect the status.
//! Every exchange can optionally be recorded for [`ApiClient::history`].

use std::fmt::Write as _;
use std::sync::{Mutex, RwLock};

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::error::Result;

/// Status and body of a finished request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

#[derive(Debug, Clone)]
struct Exchange {
    url: String,
    request_headers: Vec<(String, String)>,
    request_body: String,
    response_body: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    config: TransportConfig,
    bearer: RwLock<Option<String>>,
    history: Option<Mutex<Vec<Exchange>>>,
}

impl ApiClient {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json;charset:utf-8"),
        );
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for the Boldem API");
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        let history = config.record_history.then(|| Mutex::new(Vec::new()));
        Ok(Self {
            http,
            config,
            bearer: RwLock::new(None),
            history,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sets the token sent as `Authorization: Bearer` on every later request.
    pub fn set_bearer(&self, token: Option<String>) {
        if let Ok(mut bearer) = self.bearer.write() {
            *bearer = token;
        }
    }

    pub fn bearer(&self) -> Option<String> {
        self.bearer.read().ok().and_then(|bearer| bearer.clone())
    }

    /// POSTs `body` as JSON to `path` under the API root.
    ///
    /// `token` overrides the client-wide bearer for this request only.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        token: Option<&str>,
    ) -> Result<ApiResponse> {
        let url = self.config.endpoint(path);
        let body = serde_json::to_string(body)?;

        let mut request = self.http.post(&url).body(body.clone());
        if let Some(token) = token.map(str::to_string).or_else(|| self.bearer()) {
            request = request.bearer_auth(token);
        }
        let request = request.build()?;
        let request_headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        debug!(url = %url, "POST to Boldem API");
        let response = self.http.execute(request).await?;
        let status = response.status();
        let response_body = response.text().await?;
        debug!(url = %url, status = %status, "Boldem API responded");

        if let Some(history) = &self.history {
            if let Ok(mut history) = history.lock() {
                history.push(Exchange {
                    url,
                    request_headers,
                    request_body: body,
                    response_body: response_body.clone(),
                });
            }
        }

        Ok(ApiResponse {
            status,
            body: response_body,
        })
    }

    /// Human-readable transcript of every recorded exchange.
    pub fn history(&self) -> String {
        let Some(history) = &self.history else {
            return String::new();
        };
        let Ok(history) = history.lock() else {
            return String::new();
        };

        let mut out = String::new();
        for exchange in history.iter() {
            let _ = writeln!(out, "POST {}", exchange.url);
            for (name, value) in &exchange.request_headers {
                let _ = writeln!(out, "{name}: {value}");
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", exchange.request_body);
            let _ = writeln!(out, "{}", exchange.response_body);
        }
        out
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_url", &self.config.api_url)
            .field("has_bearer", &self.bearer().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn client_for(server: &MockServer, record_history: bool) -> ApiClient {
        let config = TransportConfig::new("id", "secret")
            .with_api_url(server.uri())
            .with_history(record_history);
        ApiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_post_json_sends_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ping"))
            .and(header("accept", "application/json;charset:utf-8"))
            .and(header("content-type", "application/json"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .and(body_json(json!({"hello": "world"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let response = client
            .post_json("ping", &json!({"hello": "world"}), None)
            .await
            .unwrap();
        assert!(response.is_ok());
        assert_eq!(response.body, "pong");
    }

    #[tokio::test]
    async fn test_non_success_status_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid"))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        let response = client.post_json("ping", &json!({}), None).await.unwrap();
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!response.is_ok());
        assert_eq!(response.body, "invalid");
    }

    #[tokio::test]
    async fn test_bearer_applies_to_later_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer cached"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        client.set_bearer(Some("cached".to_string()));
        let response = client.post_json("ping", &json!({}), None).await.unwrap();
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_history_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
            .mount(&server)
            .await;

        let client = client_for(&server, true);
        client
            .post_json("ping", &json!({"n": 1}), Some("tok"))
            .await
            .unwrap();

        let transcript = client.history();
        assert!(transcript.contains("/ping"));
        assert!(transcript.contains("authorization: Bearer tok"));
        assert!(transcript.contains("{\"n\":1}"));
        assert!(transcript.contains("{\"ok\":true}"));
    }

    #[tokio::test]
    async fn test_history_disabled_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server, false);
        client.post_json("ping", &json!({}), None).await.unwrap();
        assert_eq!(client.history(), "");
    }
}
