//! Translation of a [`Message`] into the Boldem `transactionalemails` payload.

use std::collections::{BTreeMap, HashSet};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::message::{Disposition, HeaderValue, Mailbox, Message};

/// Header routed to the top-level `Tag` field instead of `headers`.
pub const TAG_HEADER: &str = "X-MK-Tag";
/// Flag asking the provider to keep the caller's `Message-ID`.
pub const KEEP_ID_HEADER: &str = "X-MK-KeepID";
/// Fields carried elsewhere in the payload or owned by the transport.
pub const EXCLUDED_HEADERS: [&str; 4] = ["Subject", "Content-Type", "MIME-Version", "Date"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_display_name: Option<String>,
    pub to: Vec<Recipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<PayloadAttachment>>,
    pub headers: BTreeMap<String, HeaderField>,
    #[serde(rename = "Tag", skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<&Mailbox> for Recipient {
    fn from(mailbox: &Mailbox) -> Self {
        Self {
            address: mailbox.address.clone(),
            display_name: mailbox.display_name().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttachment {
    pub name: String,
    /// Base64 of the raw attachment bytes.
    pub content: String,
    pub content_type: String,
    #[serde(rename = "ContentID", skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// A value in the payload `headers` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    Text(String),
    Flag(bool),
}

/// Builds payloads, applying a fixed set of default headers to every message.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    default_headers: Vec<(String, String)>,
}

impl PayloadBuilder {
    pub fn new(default_headers: Vec<(String, String)>) -> Self {
        Self { default_headers }
    }

    pub fn default_headers(&self) -> &[(String, String)] {
        &self.default_headers
    }

    pub fn build(&self, message: &Message) -> Payload {
        let mut payload = Payload::default();
        apply_recipients(&mut payload, message);
        apply_parts(&mut payload, message);
        self.apply_headers(&mut payload, message);
        payload
    }

    fn apply_headers(&self, payload: &mut Payload, message: &Message) {
        let mut headers = BTreeMap::new();
        let mut seen = HashSet::new();

        for header in &message.headers {
            let name = header.name.as_str();
            if EXCLUDED_HEADERS.contains(&name) {
                continue;
            }
            seen.insert(name);

            let Some(value) = header.value.payload_value() else {
                continue;
            };
            if name == TAG_HEADER {
                payload.tag = Some(value.to_string());
                continue;
            }
            headers.insert(name.to_string(), HeaderField::Text(value.to_string()));
            if name == "Message-ID" && matches!(header.value, HeaderValue::Structured(_)) {
                headers.insert(KEEP_ID_HEADER.to_string(), HeaderField::Flag(true));
            }
        }

        // A name seen in the message, even once, shadows its default.
        for (name, value) in &self.default_headers {
            if seen.contains(name.as_str()) {
                continue;
            }
            if name == TAG_HEADER {
                payload.tag.get_or_insert_with(|| value.clone());
            } else {
                headers.insert(name.clone(), HeaderField::Text(value.clone()));
            }
        }

        payload.headers = headers;
    }
}

fn apply_recipients(payload: &mut Payload, message: &Message) {
    payload.subject = message.subject.clone();

    for sender in &message.from {
        payload.from = Some(sender.address.clone());
        if let Some(name) = sender.display_name() {
            payload.from_display_name = Some(name.to_string());
        }
    }

    payload.to = message
        .to
        .iter()
        .chain(&message.cc)
        .chain(&message.bcc)
        .map(Recipient::from)
        .collect();

    // Only the last Reply-To survives.
    for reply_to in &message.reply_to {
        payload.reply_to = Some(reply_to.address.clone());
        if let Some(name) = reply_to.display_name() {
            payload.reply_to_display_name = Some(name.to_string());
        }
    }
}

fn apply_parts(payload: &mut Payload, message: &Message) {
    match message.content_type.as_str() {
        "text/html" | "multipart/alternative" | "multipart/mixed" => {
            payload.body_html = Some(message.body.clone());
        }
        _ => payload.body_text = Some(message.body.clone()),
    }

    if let Some(plain) = message.body_part("text/plain") {
        payload.body_text = Some(plain.to_string());
    }
    if let Some(html) = message.body_part("text/html") {
        payload.body_html = Some(html.to_string());
    }

    if message.parts.is_empty() {
        return;
    }
    let attachments = message
        .attachments()
        .map(|attachment| PayloadAttachment {
            name: attachment.filename.clone(),
            content: STANDARD.encode(&attachment.content),
            content_type: attachment.content_type.clone(),
            content_id: match (&attachment.disposition, &attachment.content_id) {
                (Disposition::Inline, Some(id)) => Some(format!("cid:{id}")),
                _ => None,
            },
        })
        .collect();
    payload.attachments = Some(attachments);
}
