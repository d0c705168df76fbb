//! Generic outgoing message model.
//!
//! A [`Message`] is what callers hand to the transport. It is deliberately
//! close to a parsed RFC 5322 message: mailbox lists, a primary body, child
//! parts and an ordered header collection that allows duplicate names.

/// An address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub address: String,
    pub display_name: Option<String>,
}

impl Mailbox {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }

    pub fn with_name(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: Some(display_name.into()),
        }
    }

    /// The display name, treating an empty one as absent.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref().filter(|name| !name.is_empty())
    }
}

/// How an attachment is meant to be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub disposition: Disposition,
    pub content_id: Option<String>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            content_type: content_type.into(),
            disposition: Disposition::Attachment,
            content_id: None,
        }
    }

    /// Marks the attachment as an inline resource referenced by `cid:`.
    pub fn inline(mut self, content_id: impl Into<String>) -> Self {
        self.disposition = Disposition::Inline;
        self.content_id = Some(content_id.into());
        self
    }
}

/// A child part of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// An alternative representation of the body (plain text or HTML).
    Body { content_type: String, body: String },
    Attachment(Attachment),
}

/// Header value, tagged by the kind of field it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Unstructured value, such as `X-Mailer` or `DKIM-Signature`.
    Text(String),
    /// Rendered field body of a date, identification, parameterized or path header.
    Structured(String),
    /// Mailbox list header; recipients travel in the mailbox lists instead.
    Address(String),
}

impl HeaderValue {
    /// Classifies a raw field body by its field name.
    pub fn for_field(name: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        match name.to_ascii_lowercase().as_str() {
            "from" | "sender" | "to" | "cc" | "bcc" | "reply-to" => Self::Address(body),
            "date" | "message-id" | "content-id" | "in-reply-to" | "references"
            | "content-type" | "content-disposition" | "return-path" => Self::Structured(body),
            _ => Self::Text(body),
        }
    }

    /// The value to copy into a payload, if this kind of header is copied at all.
    pub fn payload_value(&self) -> Option<&str> {
        match self {
            Self::Text(value) | Self::Structured(value) => Some(value),
            Self::Address(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

impl Header {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        let name = name.into();
        let value = HeaderValue::for_field(&name, body);
        Self { name, value }
    }
}

/// An assembled email message, ready to be translated into an API payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub reply_to: Vec<Mailbox>,
    pub subject: String,
    pub content_type: String,
    pub body: String,
    pub parts: Vec<Part>,
    pub headers: Vec<Header>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            subject: String::new(),
            content_type: "text/plain".to_string(),
            body: String::new(),
            parts: Vec::new(),
            headers: Vec::new(),
        }
    }
}

impl Message {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from.push(mailbox);
        self
    }

    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    pub fn cc(mut self, mailbox: Mailbox) -> Self {
        self.cc.push(mailbox);
        self
    }

    pub fn bcc(mut self, mailbox: Mailbox) -> Self {
        self.bcc.push(mailbox);
        self
    }

    pub fn reply_to(mut self, mailbox: Mailbox) -> Self {
        self.reply_to.push(mailbox);
        self
    }

    /// Sets the declared content type and the primary body.
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self.body = body.into();
        self
    }

    pub fn alternative(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.parts.push(Part::Body {
            content_type: content_type.into(),
            body: body.into(),
        });
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.parts.push(Part::Attachment(attachment));
        self
    }

    pub fn header(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, body));
        self
    }

    /// Number of recipients across To, Cc and Bcc, duplicates included.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// First non-attachment part whose content type starts with `mime_type`.
    pub fn body_part(&self, mime_type: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Body { content_type, body } if content_type.starts_with(mime_type) => {
                Some(body.as_str())
            }
            _ => None,
        })
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.parts.iter().filter_map(|part| match part {
            Part::Attachment(attachment) => Some(attachment),
            Part::Body { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_classified_by_field_name() {
        assert!(matches!(
            HeaderValue::for_field("Message-ID", "<1@x>"),
            HeaderValue::Structured(_)
        ));
        assert!(matches!(
            HeaderValue::for_field("reply-to", "a@x.com"),
            HeaderValue::Address(_)
        ));
        assert!(matches!(
            HeaderValue::for_field("X-MK-Tag", "news"),
            HeaderValue::Text(_)
        ));
        assert_eq!(HeaderValue::for_field("To", "b@x.com").payload_value(), None);
    }

    #[test]
    fn empty_display_name_is_absent() {
        assert_eq!(Mailbox::with_name("a@x.com", "").display_name(), None);
        assert_eq!(
            Mailbox::with_name("a@x.com", "Alice").display_name(),
            Some("Alice")
        );
    }

    #[test]
    fn recipient_count_keeps_duplicates() {
        let message = Message::new("Hi")
            .to(Mailbox::new("a@x.com"))
            .cc(Mailbox::new("a@x.com"))
            .bcc(Mailbox::new("b@x.com"));
        assert_eq!(message.recipient_count(), 3);
    }

    #[test]
    fn body_part_ignores_attachments() {
        let message = Message::new("Hi")
            .attach(Attachment::new("notes.txt", "text/plain", b"file".to_vec()))
            .alternative("text/plain; charset=utf-8", "plain");
        assert_eq!(message.body_part("text/plain"), Some("plain"));
        assert_eq!(message.body_part("text/html"), None);
    }
}
