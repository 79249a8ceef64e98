//! MIME walking: turns a raw message into its filename-bearing parts

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

/// Maximum depth of nested `message/rfc822` parts that are descended into
const MAX_DEPTH: usize = 8;

/// One extracted attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename declared by the part
    pub filename: String,
    /// Content with only its transfer encoding undone, never charset-converted
    pub content: Vec<u8>,
}

impl Attachment {
    /// Create an attachment
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Content digest of the attachment bytes
    pub fn digest(&self) -> String {
        super::content_digest(&self.content)
    }
}

/// Walks a raw message and collects the parts that declare a filename
pub trait MimeWalker: Send + Sync {
    /// Returns `None` when the message cannot be parsed as MIME
    fn collect_attachments(&self, raw: &[u8]) -> Option<Vec<Attachment>>;
}

/// [`MimeWalker`] backed by `mail-parser`
#[derive(Debug, Clone, Copy, Default)]
pub struct MailParserWalker;

impl MimeWalker for MailParserWalker {
    fn collect_attachments(&self, raw: &[u8]) -> Option<Vec<Attachment>> {
        let message = MessageParser::default().parse(raw)?;

        let mut attachments = Vec::new();
        walk_parts(&message, &mut attachments, 0);
        Some(attachments)
    }
}

/// Depth-first, document-order walk over every part
fn walk_parts(message: &Message<'_>, out: &mut Vec<Attachment>, depth: usize) {
    for part in &message.parts {
        // Containers carry no payload of their own
        if matches!(part.body, PartType::Multipart(_)) {
            continue;
        }

        if let Some(name) = part.attachment_name() {
            out.push(Attachment::new(name, part_bytes(message, part)));
        }

        if let PartType::Message(nested) = &part.body {
            if depth < MAX_DEPTH {
                walk_parts(nested, out, depth + 1);
            }
        }
    }
}

/// Part payload as sent, minus the Content-Transfer-Encoding
fn part_bytes(message: &Message<'_>, part: &MessagePart<'_>) -> Vec<u8> {
    // Text parts come back charset-decoded, so go back to the raw body
    if let PartType::Binary(data) | PartType::InlineBinary(data) = &part.body {
        return data.to_vec();
    }

    let raw = message
        .raw_message
        .get(part.offset_body..part.offset_end)
        .unwrap_or_default();

    let decoded = match part.content_transfer_encoding() {
        Some(cte) if cte.eq_ignore_ascii_case("base64") => base64_decode(raw),
        Some(cte) if cte.eq_ignore_ascii_case("quoted-printable") => quoted_printable_decode(raw),
        _ => None,
    };

    decoded.unwrap_or_else(|| raw.to_vec())
}
