//! Conversion from a parsed MIME message into a [`Message`].

use mail_parser::{Address, ContentType, MessagePart, MimeHeaders, PartType};

use crate::message::{Attachment, Disposition, Header, HeaderValue, Mailbox, Message, Part};

impl Message {
    /// Builds a message from `mail_parser` output.
    ///
    /// Multipart messages get an empty primary body; their text and HTML
    /// parts become alternatives and everything else an attachment.
    pub fn from_parsed(parsed: &mail_parser::Message<'_>) -> Self {
        let mut message = Message::new(parsed.subject().unwrap_or_default());
        message.from = mailboxes(parsed.from());
        message.to = mailboxes(parsed.to());
        message.cc = mailboxes(parsed.cc());
        message.bcc = mailboxes(parsed.bcc());
        message.reply_to = mailboxes(parsed.reply_to());

        let root = parsed.parts.first();
        if let Some(content_type) = root.and_then(|part| part.content_type()) {
            message.content_type = mime_type(content_type);
        }
        if let Some(text) = root.and_then(|part| part.text_contents()) {
            message.body = text.to_string();
        }
        message.parts = parsed
            .parts
            .iter()
            .skip(1)
            .filter_map(child_part)
            .collect();

        let raw = parsed.raw_message();
        message.headers = parsed
            .headers()
            .iter()
            .map(|header| {
                let name = header.name.as_str();
                let field_body = raw
                    .get(header.offset_start..header.offset_end)
                    .map(|body| String::from_utf8_lossy(body).trim().to_string())
                    .unwrap_or_default();
                // Unstructured values are taken decoded, the rest as rendered.
                let value = match (HeaderValue::for_field(name, field_body), &header.value) {
                    (HeaderValue::Text(_), mail_parser::HeaderValue::Text(text)) => {
                        HeaderValue::Text(text.to_string())
                    }
                    (value, _) => value,
                };
                Header {
                    name: name.to_string(),
                    value,
                }
            })
            .collect();

        message
    }

    /// Adds envelope recipients missing from To, Cc and Bcc as Bcc.
    pub fn with_envelope_recipients<'a>(
        mut self,
        envelope: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        for address in envelope {
            let known = self
                .to
                .iter()
                .chain(&self.cc)
                .chain(&self.bcc)
                .any(|mailbox| mailbox.address.eq_ignore_ascii_case(address));
            if !known {
                self.bcc.push(Mailbox::new(address));
            }
        }
        self
    }
}

fn mailboxes(address: Option<&Address<'_>>) -> Vec<Mailbox> {
    address
        .map(|address| address.clone().into_list())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|addr| {
            let address = addr.address?.to_string();
            Some(Mailbox {
                address,
                display_name: addr.name.map(|name| name.to_string()),
            })
        })
        .collect()
}

fn mime_type(content_type: &ContentType<'_>) -> String {
    match content_type.subtype() {
        Some(subtype) => format!("{}/{}", content_type.ctype(), subtype),
        None => content_type.ctype().to_string(),
    }
    .to_ascii_lowercase()
}

fn child_part(part: &MessagePart<'_>) -> Option<Part> {
    let disposition = part
        .content_disposition()
        .map(|disposition| disposition.ctype().to_ascii_lowercase());
    let is_attachment =
        part.attachment_name().is_some() || disposition.as_deref() == Some("attachment");

    let (default_type, inline) = match &part.body {
        PartType::Multipart(_) => return None,
        PartType::Text(text) if !is_attachment => {
            return Some(Part::Body {
                content_type: part
                    .content_type()
                    .map_or_else(|| "text/plain".to_string(), mime_type),
                body: text.to_string(),
            });
        }
        PartType::Html(html) if !is_attachment => {
            return Some(Part::Body {
                content_type: part
                    .content_type()
                    .map_or_else(|| "text/html".to_string(), mime_type),
                body: html.to_string(),
            });
        }
        PartType::Text(_) => ("text/plain", false),
        PartType::Html(_) => ("text/html", false),
        PartType::InlineBinary(_) => ("application/octet-stream", true),
        PartType::Binary(_) => ("application/octet-stream", false),
        PartType::Message(_) => ("message/rfc822", false),
    };

    let disposition = if inline || disposition.as_deref() == Some("inline") {
        Disposition::Inline
    } else {
        Disposition::Attachment
    };
    Some(Part::Attachment(Attachment {
        filename: part.attachment_name().unwrap_or("attachment").to_string(),
        content: part.contents().to_vec(),
        content_type: part
            .content_type()
            .map_or_else(|| default_type.to_string(), mime_type),
        disposition,
        content_id: part
            .content_id()
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use mail_parser::MessageParser;

    use super::*;
    use crate::payload::{HeaderField, PayloadBuilder, KEEP_ID_HEADER};

    const SIMPLE: &str = "From: Alice <a@x.com>\r\n\
To: b@x.com, Carol <c@x.com>\r\n\
Cc: d@x.com\r\n\
Reply-To: Help <help@x.com>\r\n\
Subject: Hi\r\n\
Message-ID: <abc@x.com>\r\n\
Date: Tue, 13 Oct 2026 10:00:00 +0000\r\n\
X-MK-Tag: newsletter\r\n\
X-Mailer: relay\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
hello\r\n";

    const MULTIPART: &str = "From: a@x.com\r\n\
To: b@x.com\r\n\
Subject: Report\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain body\r\n\
--inner\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html body</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer\r\n\
Content-Type: image/png\r\n\
Content-Disposition: inline; filename=\"logo.png\"\r\n\
Content-ID: <logo@x>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw==\r\n\
--outer--\r\n";

    fn parse(raw: &str) -> Message {
        let parsed = MessageParser::default().parse(raw).unwrap();
        Message::from_parsed(&parsed)
    }

    #[test]
    fn test_simple_message_conversion() {
        let message = parse(SIMPLE);
        assert_eq!(message.subject, "Hi");
        assert_eq!(message.from, vec![Mailbox::with_name("a@x.com", "Alice")]);
        assert_eq!(message.to.len(), 2);
        assert_eq!(message.to[1].display_name(), Some("Carol"));
        assert_eq!(message.cc, vec![Mailbox::new("d@x.com")]);
        assert_eq!(message.reply_to[0].address, "help@x.com");
        assert_eq!(message.content_type, "text/plain");
        assert_eq!(message.body.trim_end(), "hello");
        assert!(message.parts.is_empty());
    }

    #[test]
    fn test_headers_keep_kind_and_order() {
        let message = parse(SIMPLE);
        let names: Vec<_> = message.headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names[0], "From");
        assert!(names.contains(&"X-Mailer"));

        let message_id = message
            .headers
            .iter()
            .find(|h| h.name == "Message-ID")
            .unwrap();
        assert_eq!(
            message_id.value,
            HeaderValue::Structured("<abc@x.com>".to_string())
        );

        let payload = PayloadBuilder::default().build(&message);
        let headers = payload.headers;
        assert_eq!(payload.tag.as_deref(), Some("newsletter"));
        assert_eq!(headers.get(KEEP_ID_HEADER), Some(&HeaderField::Flag(true)));
        assert_eq!(
            headers.get("X-Mailer"),
            Some(&HeaderField::Text("relay".to_string()))
        );
        assert!(!headers.contains_key("From"));
        assert!(!headers.contains_key("Date"));
    }

    #[test]
    fn test_multipart_conversion() {
        let message = parse(MULTIPART);
        assert_eq!(message.content_type, "multipart/mixed");
        assert_eq!(message.body_part("text/plain").map(str::trim_end), Some("plain body"));
        assert_eq!(
            message.body_part("text/html").map(str::trim_end),
            Some("<p>html body</p>")
        );

        let attachments: Vec<_> = message.attachments().collect();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename, "report.pdf");
        assert_eq!(attachments[0].content_type, "application/pdf");
        assert_eq!(attachments[0].content, b"%PDF-");
        assert_eq!(attachments[0].disposition, Disposition::Attachment);
        assert_eq!(attachments[1].disposition, Disposition::Inline);
        assert_eq!(attachments[1].content_id.as_deref(), Some("logo@x"));

        let payload = PayloadBuilder::default().build(&message);
        let sent = payload.attachments.unwrap();
        assert_eq!(sent[1].content_id.as_deref(), Some("cid:logo@x"));
    }

    #[test]
    fn test_envelope_recipients_become_bcc() {
        let message =
            parse(SIMPLE).with_envelope_recipients(["B@x.com", "hidden@x.com", "d@x.com"]);
        assert_eq!(message.bcc, vec![Mailbox::new("hidden@x.com")]);
        assert_eq!(message.recipient_count(), 4);
    }
}
