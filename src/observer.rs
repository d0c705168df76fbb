//! Hooks fired around each send.

use crate::message::Message;

/// Whether a send should go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendControl {
    Continue,
    Cancel,
}

/// Outcome reported to [`SendObserver::send_performed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Success,
    Failed,
}

/// Observer of the send lifecycle. All methods default to no-ops.
///
/// Observers run in registration order. The first one returning
/// [`SendControl::Cancel`] from `before_send` stops the send; later observers
/// are not consulted.
pub trait SendObserver: Send + Sync {
    fn before_send(&self, _message: &Message) -> SendControl {
        SendControl::Continue
    }

    /// Raw response body of the send request and whether it succeeded.
    /// The body is empty when no response was received.
    fn response_received(&self, _body: &str, _success: bool) {}

    fn send_performed(&self, _message: &Message, _result: SendResult) {}
}
