//! Sends [`Message`]s through the Boldem transactional email API.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, ApiResponse};
use crate::config::TransportConfig;
use crate::error::Result;
use crate::message::Message;
use crate::observer::{SendControl, SendObserver, SendResult};
use crate::payload::{Payload, PayloadBuilder};
use crate::token::{Credentials, TokenManager};

const SEND_PATH: &str = "transactionalemails";

/// Boldem transport: payload building, token handling and delivery.
///
/// One access token is cached per transport. Concurrent sends share it and
/// acquisition is serialized behind a lock.
pub struct BoldemTransport {
    client: ApiClient,
    tokens: Mutex<TokenManager>,
    builder: PayloadBuilder,
    observers: Vec<Arc<dyn SendObserver>>,
}

impl BoldemTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let credentials = Credentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        };
        let tokens = TokenManager::new(credentials, config.token_expiry);
        let builder = PayloadBuilder::new(config.default_headers.clone());
        Ok(Self {
            client: ApiClient::new(config)?,
            tokens: Mutex::new(tokens),
            builder,
            observers: Vec::new(),
        })
    }

    pub fn register_observer(&mut self, observer: Arc<dyn SendObserver>) {
        self.observers.push(observer);
    }

    /// The payload that [`send`](Self::send) would post for `message`.
    pub fn payload(&self, message: &Message) -> Payload {
        self.builder.build(message)
    }

    /// Sends `message`, returning the number of recipients on success and 0
    /// on cancellation or any failure.
    pub async fn send(&self, message: &Message) -> usize {
        match self.try_send(message).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, subject = %message.subject, "Boldem send failed");
                0
            }
        }
    }

    /// Like [`send`](Self::send), but authentication and transport errors are
    /// returned instead of folded into 0. A non-200 answer is still `Ok(0)`.
    pub async fn try_send(&self, message: &Message) -> Result<usize> {
        if self
            .observers
            .iter()
            .any(|observer| observer.before_send(message) == SendControl::Cancel)
        {
            info!(subject = %message.subject, "Send cancelled by observer");
            return Ok(0);
        }

        let payload = self.builder.build(message);
        debug!(
            subject = %payload.subject,
            recipients = payload.to.len(),
            attachments = payload.attachments.as_ref().map_or(0, Vec::len),
            tag = ?payload.tag,
            "Sending email via Boldem"
        );

        let outcome = self.deliver(&payload).await;
        let (success, body) = match &outcome {
            Ok(response) => (response.is_ok(), response.body.as_str()),
            Err(_) => (false, ""),
        };

        for observer in &self.observers {
            observer.response_received(body, success);
        }
        let result = if success {
            SendResult::Success
        } else {
            SendResult::Failed
        };
        for observer in &self.observers {
            observer.send_performed(message, result);
        }

        let response = outcome?;
        if success {
            let count = message.recipient_count();
            info!(subject = %message.subject, recipients = count, "Email accepted by Boldem");
            Ok(count)
        } else {
            warn!(
                status = %response.status,
                error = %response.body,
                "Boldem rejected email"
            );
            Ok(0)
        }
    }

    async fn deliver(&self, payload: &Payload) -> Result<ApiResponse> {
        let token = self.get_token().await?;
        self.client.post_json(SEND_PATH, payload, Some(&token)).await
    }

    /// Returns the cached access token, acquiring one if needed.
    pub async fn get_token(&self) -> Result<String> {
        self.tokens.lock().await.get_token(&self.client).await
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        self.tokens.lock().await.set_token(token);
    }

    /// Forgets the cached token; the next send acquires a new one.
    pub async fn clear_token(&self) {
        self.tokens.lock().await.clear();
        self.client.set_bearer(None);
    }

    pub async fn set_credentials(&self, client_id: impl Into<String>, client_secret: impl Into<String>) {
        self.tokens
            .lock()
            .await
            .set_credentials(client_id, client_secret);
    }

    pub async fn client_id(&self) -> String {
        self.tokens.lock().await.credentials().client_id.clone()
    }

    /// Transcript of all HTTP exchanges, when history recording is enabled.
    pub fn history(&self) -> String {
        self.client.history()
    }
}

impl std::fmt::Debug for BoldemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoldemTransport")
            .field("client", &self.client)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
