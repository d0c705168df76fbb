use anyhow::{Context, Result};
use mail_parser::MessageParser;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::message::Message;
use crate::transport::BoldemTransport;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    /// Raw DATA lines, without the terminating `.` line.
    pub data: Vec<u8>,
}

impl Mail {
    /// The DATA section, dot-unstuffed.
    pub fn body(&self) -> Vec<u8> {
        self.data
            .split_inclusive(|&b| b == b'\n')
            .flat_map(|line| line.strip_prefix(b".").unwrap_or(line))
            .copied()
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum State {
    Fresh,
    Greeted,
    ReceivingRcpt(Mail),
    ReceivingData(Mail),
    Received(Mail),
}

struct StateMachine {
    state: State,
    ehlo_greeting: String,
}

/// A state machine capable of handling SMTP commands
/// for receiving mail.
/// Use handle_smtp() to handle a single line.
/// The return value from handle_smtp() is the response
/// that should be sent back to the client.
impl StateMachine {
    const OH_HAI: &[u8] = b"220 boldem-relay\r\n";
    const KK: &[u8] = b"250 Ok\r\n";
    const QUEUED: &[u8] = b"250 Ok: queued\r\n";
    const NOT_RELAYED: &[u8] = b"451 Relay to Boldem failed, try again later\r\n";
    const AUTH_OK: &[u8] = b"235 Ok\r\n";
    const SEND_DATA_PLZ: &[u8] = b"354 End data with <CR><LF>.<CR><LF>\r\n";
    const KTHXBYE: &[u8] = b"221 Bye\r\n";
    const HOLD_YOUR_HORSES: &[u8] = &[];

    pub fn new(domain: impl AsRef<str>) -> Self {
        tracing::trace!("New state machine initialized");
        let domain = domain.as_ref();
        let ehlo_greeting = format!("250-{domain} Hello {domain}\r\n250 AUTH PLAIN LOGIN\r\n");
        Self {
            state: State::Fresh,
            ehlo_greeting,
        }
    }

    /// Handles a single line and returns a proper SMTP response.
    ///
    /// The end of DATA answers [`StateMachine::QUEUED`]; the server confirms
    /// it only once the mail has been relayed.
    pub fn handle_smtp(&mut self, line: &[u8]) -> Result<&[u8]> {
        // Inside DATA everything is content until the terminating dot.
        if let State::ReceivingData(mail) = &mut self.state {
            if line == b".\r\n" || line == b".\n" {
                tracing::debug!("Received {} bytes of data", mail.data.len());
                let mail = std::mem::take(mail);
                self.state = State::Received(mail);
                return Ok(StateMachine::QUEUED);
            }
            mail.data.extend_from_slice(line);
            return Ok(StateMachine::HOLD_YOUR_HORSES);
        }

        let raw_msg = std::str::from_utf8(line).context("received non UTF-8 command")?;
        tracing::trace!("Received {raw_msg} in state {:?}", self.state);
        let state = self.state.clone();

        let mut msg = raw_msg.split_whitespace();
        let command = msg.next().context("received empty command")?.to_lowercase();
        let argument = raw_msg.trim().get(command.len()..).unwrap_or_default().trim();
        match (command.as_str(), state) {
            ("ehlo", State::Fresh) => {
                tracing::trace!("Sending AUTH info");
                self.state = State::Greeted;
                Ok(self.ehlo_greeting.as_bytes())
            }
            ("helo", State::Fresh) => {
                self.state = State::Greeted;
                Ok(StateMachine::KK)
            }
            ("noop", _) | ("help", _) | ("info", _) | ("vrfy", _) | ("expn", _) => {
                tracing::trace!("Got {command}");
                Ok(StateMachine::KK)
            }
            ("rset", _) => {
                self.state = State::Greeted;
                Ok(StateMachine::KK)
            }
            ("auth", _) => {
                tracing::trace!("Acknowledging AUTH");
                Ok(StateMachine::AUTH_OK)
            }
            ("mail", State::Greeted) => {
                tracing::trace!("Receiving MAIL");
                let from = path_argument(argument, "FROM:").context("received incorrect MAIL")?;
                tracing::debug!("FROM: {from}");
                self.state = State::ReceivingRcpt(Mail {
                    from,
                    ..Default::default()
                });
                Ok(StateMachine::KK)
            }
            ("rcpt", State::ReceivingRcpt(mut mail)) => {
                tracing::trace!("Receiving rcpt");
                let to = path_argument(argument, "TO:").context("received incorrect RCPT")?;
                tracing::debug!("TO: {to}");
                mail.to.push(to);
                self.state = State::ReceivingRcpt(mail);
                Ok(StateMachine::KK)
            }
            ("data", State::ReceivingRcpt(mail)) if !mail.to.is_empty() => {
                tracing::trace!("Receiving data");
                self.state = State::ReceivingData(mail);
                Ok(StateMachine::SEND_DATA_PLZ)
            }
            ("quit", _) => {
                if matches!(self.state, State::ReceivingRcpt(_)) {
                    tracing::warn!("Received quit in the middle of a transaction");
                }
                Ok(StateMachine::KTHXBYE)
            }
            (msg, state) => {
                tracing::trace!(
                    "Bailing out: Unexpected message received in state {state:?}: {msg}"
                );
                anyhow::bail!(
                    "Unexpected message received in state {:?}: {raw_msg}",
                    self.state
                )
            }
        }
    }
}

/// Extracts the address from `FROM:<a@b>` / `TO: <a@b>` style arguments.
fn path_argument(argument: &str, prefix: &str) -> Option<String> {
    let head = argument.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let path = argument[prefix.len()..].split_whitespace().next()?;
    Some(path.trim_start_matches('<').trim_end_matches('>').to_string())
}

/// SMTP server, which handles user connections
/// and relays received messages to the Boldem API.
pub struct Server {
    stream: tokio::net::TcpStream,
    state_machine: StateMachine,
    transport: Arc<BoldemTransport>,
}

impl Server {
    /// Creates a new server from a connected stream
    pub fn new(
        domain: impl AsRef<str>,
        stream: tokio::net::TcpStream,
        transport: Arc<BoldemTransport>,
    ) -> Self {
        Self {
            stream,
            state_machine: StateMachine::new(domain),
            transport,
        }
    }

    /// Runs the server loop, accepting and handling SMTP commands
    pub async fn serve(mut self) -> Result<()> {
        self.greet().await?;

        let mut buf = vec![0; 65536];
        let mut pending = Vec::new();
        'session: loop {
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                tracing::info!("Received EOF");
                break;
            }
            // Only complete lines are handled, so a read may end mid-character.
            pending.extend_from_slice(&buf[0..n]);
            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                let response = self.state_machine.handle_smtp(&line)?;
                if response == StateMachine::HOLD_YOUR_HORSES {
                    continue;
                }
                if response != StateMachine::QUEUED {
                    self.stream.write_all(response).await?;
                    if response == StateMachine::KTHXBYE {
                        break 'session;
                    }
                    continue;
                }

                let received =
                    std::mem::replace(&mut self.state_machine.state, State::Greeted);
                let sent = match received {
                    State::Received(mail) => self.relay(&mail).await,
                    _ => 0,
                };
                let reply = if sent > 0 {
                    StateMachine::QUEUED
                } else {
                    StateMachine::NOT_RELAYED
                };
                self.stream.write_all(reply).await?;
            }
        }
        tracing::trace!("State machine exited {:?}", self.state_machine.state);
        if let State::ReceivingData(mail) = &self.state_machine.state {
            tracing::info!("Received EOF before end of data, discarding mail from {}", mail.from);
        }
        Ok(())
    }

    /// Parses a received mail and hands it to the transport.
    ///
    /// Returns the number of accepted recipients, 0 when nothing was sent.
    async fn relay(&self, mail: &Mail) -> usize {
        tracing::info!(from = %mail.from, recipients = mail.to.len(), "Relaying mail");
        let body = mail.body();
        let Some(parsed) = MessageParser::default().parse(body.as_slice()) else {
            tracing::warn!("Cant parse message, discarding");
            return 0;
        };
        let message = Message::from_parsed(&parsed)
            .with_envelope_recipients(mail.to.iter().map(String::as_str));
        let sent = self.transport.send(&message).await;
        tracing::info!(subject = %message.subject, sent, "Relay finished");
        sent
    }

    /// Sends the initial SMTP greeting
    async fn greet(&mut self) -> Result<()> {
        self.stream
            .write_all(StateMachine::OH_HAI)
            .await
            .map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_flow() {
        let mut sm = StateMachine::new("dummy");
        assert_eq!(sm.state, State::Fresh);
        sm.handle_smtp(b"HELO localhost\r\n").unwrap();
        assert_eq!(sm.state, State::Greeted);
        sm.handle_smtp(b"MAIL FROM:<local@example.com>\r\n").unwrap();
        assert!(matches!(sm.state, State::ReceivingRcpt(_)));
        sm.handle_smtp(b"RCPT TO: <a@localhost.com>\r\n").unwrap();
        assert!(matches!(sm.state, State::ReceivingRcpt(_)));
        sm.handle_smtp(b"RCPT TO:<b@localhost.com>\r\n").unwrap();
        assert!(matches!(sm.state, State::ReceivingRcpt(_)));
        sm.handle_smtp(b"DATA\r\n").unwrap();
        assert!(matches!(sm.state, State::ReceivingData(_)));
        for line in ["Subject: hello\r\n", "\r\n", "world\r\n"] {
            let response = sm.handle_smtp(line.as_bytes()).unwrap();
            assert!(response.is_empty());
        }
        let response = sm.handle_smtp(b".\r\n").unwrap();
        assert_eq!(response, StateMachine::QUEUED);
        let State::Received(mail) = &sm.state else {
            panic!("expected a received mail, got {:?}", sm.state);
        };
        assert_eq!(mail.from, "local@example.com");
        assert_eq!(mail.to, ["a@localhost.com", "b@localhost.com"]);
        assert_eq!(mail.body(), b"Subject: hello\r\n\r\nworld\r\n");
    }

    #[test]
    fn test_no_greeting() {
        let mut sm = StateMachine::new("dummy");
        assert_eq!(sm.state, State::Fresh);
        for command in [
            "MAIL FROM: <local@example.com>",
            "RCPT TO: <local@example.com>",
            "DATA hey",
            "GARBAGE",
        ] {
            assert!(sm.handle_smtp(command.as_bytes()).is_err());
        }
    }

    #[test]
    fn test_data_requires_recipient() {
        let mut sm = StateMachine::new("dummy");
        sm.handle_smtp(b"EHLO client\r\n").unwrap();
        sm.handle_smtp(b"MAIL FROM:<a@x.com>\r\n").unwrap();
        assert!(sm.handle_smtp(b"DATA\r\n").is_err());
    }

    #[test]
    fn test_data_keeps_raw_bytes() {
        let mut sm = StateMachine::new("dummy");
        sm.handle_smtp(b"EHLO client\r\n").unwrap();
        sm.handle_smtp(b"MAIL FROM:<a@x.com>\r\n").unwrap();
        sm.handle_smtp(b"RCPT TO:<b@x.com>\r\n").unwrap();
        sm.handle_smtp(b"DATA\r\n").unwrap();
        // Latin-2 encoded body, not valid UTF-8.
        sm.handle_smtp(b"P\xf8\xedli\xb9\r\n").unwrap();
        sm.handle_smtp(b".\r\n").unwrap();
        let State::Received(mail) = &sm.state else {
            panic!("expected a received mail, got {:?}", sm.state);
        };
        assert_eq!(mail.body(), b"P\xf8\xedli\xb9\r\n");
    }

    #[test]
    fn test_dot_unstuffing() {
        let mail = Mail {
            data: b"line\r\n..leading dot\r\n".to_vec(),
            ..Default::default()
        };
        assert_eq!(mail.body(), b"line\r\n.leading dot\r\n");
    }

    #[test]
    fn test_path_argument() {
        assert_eq!(
            path_argument("from:<a@x.com> SIZE=100", "FROM:").as_deref(),
            Some("a@x.com")
        );
        assert_eq!(path_argument("TO: <b@x.com>", "TO:").as_deref(), Some("b@x.com"));
        assert_eq!(path_argument("<b@x.com>", "TO:"), None);
    }
}
