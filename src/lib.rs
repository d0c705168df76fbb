//! Relay for the Boldem transactional email API.
//!
//! [`BoldemTransport`] turns a [`Message`] into the JSON payload of the
//! `transactionalemails` endpoint and posts it, obtaining and caching an
//! OAuth access token on the way. The [`smtp`] module puts an SMTP front end
//! in front of it.
//!
//! ```rust,ignore
//! use boldem_relay::{BoldemTransport, Mailbox, Message, TransportConfig};
//!
//! let transport = BoldemTransport::new(TransportConfig::from_env()?)?;
//! let message = Message::new("Hi")
//!     .from(Mailbox::with_name("a@x.com", "Alice"))
//!     .to(Mailbox::new("b@x.com"))
//!     .body("text/plain", "hello");
//! let recipients = transport.send(&message).await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod mime;
pub mod observer;
pub mod payload;
pub mod smtp;
pub mod token;
pub mod transport;

pub use config::{TokenExpiry, TransportConfig};
pub use error::{RelayError, Result};
pub use message::{Attachment, Disposition, Header, HeaderValue, Mailbox, Message, Part};
pub use observer::{SendControl, SendObserver, SendResult};
pub use payload::{Payload, PayloadBuilder};
pub use transport::BoldemTransport;
