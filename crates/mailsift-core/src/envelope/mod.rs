//! Message envelope: one received email and its derived attachments

mod mime;
mod record;

pub use mime::{Attachment, MailParserWalker, MimeWalker};
pub use record::{AttachmentRecord, PersistReport, CONTENT_EXTENSION, SIDECAR_EXTENSION};

use chrono::Local;
use mailsift_common::types::NULL_SENDER;
use mailsift_common::{Error, Result};
use mailsift_storage::FileStorage;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of every header line written by [`MessageEnvelope::serialize`]
pub const HEADER_MARKER: &str = "MAILSIFT:";

/// Stands in for the null sender in file names
pub const NULL_SENDER_PLACEHOLDER: &str = "null-sender";

/// Longest sender prefix kept in a message file name
const MAX_SENDER_COMPONENT: usize = 64;

/// SHA-256 hex digest of `content`
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// One received email
///
/// The raw body is never modified. Attachments are extracted on first
/// request and cached for the lifetime of the envelope.
pub struct MessageEnvelope {
    peer: String,
    sender: String,
    recipients: Vec<String>,
    raw_body: Vec<u8>,
    walker: Arc<dyn MimeWalker>,
    attachments: OnceLock<Arc<[Attachment]>>,
}

impl MessageEnvelope {
    /// Create an envelope that parses with `mail-parser`
    pub fn new(
        peer: impl Into<String>,
        sender: impl Into<String>,
        recipients: Vec<String>,
        raw_body: impl Into<Vec<u8>>,
    ) -> Self {
        Self::with_walker(peer, sender, recipients, raw_body, Arc::new(MailParserWalker))
    }

    /// Create an envelope with a custom MIME walker
    pub fn with_walker(
        peer: impl Into<String>,
        sender: impl Into<String>,
        recipients: Vec<String>,
        raw_body: impl Into<Vec<u8>>,
        walker: Arc<dyn MimeWalker>,
    ) -> Self {
        Self {
            peer: peer.into(),
            sender: sender.into(),
            recipients,
            raw_body: raw_body.into(),
            walker,
            attachments: OnceLock::new(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Whether the sender is the SMTP null sender
    pub fn is_null_sender(&self) -> bool {
        let sender = self.sender.trim();
        sender.is_empty() || sender == NULL_SENDER
    }

    /// Header lines followed by the verbatim raw body
    pub fn serialize(&self) -> Vec<u8> {
        let header = format!(
            "{m} Received message from : {}\n\
             {m} Message addressed from: {}\n\
             {m} Message addressed to  : [{}]\n\
             {m} Message length        : {}\n\
             {m} Original message seen below\n",
            self.peer,
            self.sender,
            self.recipients.join(", "),
            self.raw_body.len(),
            m = HEADER_MARKER,
        );

        let mut out = Vec::with_capacity(header.len() + self.raw_body.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.raw_body);
        out
    }

    /// Attachments in document order
    ///
    /// Walks the MIME tree on the first call only. A message that cannot be
    /// parsed yields no attachments.
    pub fn extract_attachments(&self) -> &[Attachment] {
        self.attachments.get_or_init(|| self.walk())
    }

    /// Shared handle to the extracted attachments
    pub fn shared_attachments(&self) -> Arc<[Attachment]> {
        self.extract_attachments();
        self.attachments
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    fn walk(&self) -> Arc<[Attachment]> {
        match self.walker.collect_attachments(&self.raw_body) {
            Some(found) => {
                for attachment in &found {
                    info!(name = %attachment.filename, size = attachment.content.len(), "Found attachment");
                }
                Arc::from(found)
            }
            None => {
                warn!(
                    sender = %self.sender,
                    length = self.raw_body.len(),
                    "Message could not be parsed as MIME, treating it as having no attachments"
                );
                Arc::from(Vec::new())
            }
        }
    }

    /// File name used by [`persist`](Self::persist)
    ///
    /// `<sender>_<YYYY-MM-DD_HH-MM-SS>_<uuid>`; the UUID keeps concurrent
    /// writers with the same sender and timestamp apart.
    pub fn unique_file_name(&self) -> String {
        let sender = if self.is_null_sender() {
            NULL_SENDER_PLACEHOLDER.to_string()
        } else {
            let mut sender = sanitize_file_component(&self.sender);
            // ASCII after sanitizing, so any index is a char boundary
            sender.truncate(MAX_SENDER_COMPONENT);
            sender
        };

        format!(
            "{}_{}_{}",
            sender,
            Local::now().format("%Y-%m-%d_%H-%M-%S"),
            Uuid::new_v4()
        )
    }

    /// Write the serialized envelope to a fresh file in `store`
    pub async fn persist(&self, store: &dyn FileStorage) -> Result<String> {
        let name = self.unique_file_name();
        let path = store.store(&name, &self.serialize()).await?;
        info!(path = %path, "Saved message");
        Ok(path)
    }

    /// Write every attachment as `<digest>.file` plus a `<digest>.json` sidecar
    ///
    /// The two writes are independent: a failed sidecar leaves the content
    /// file in place, and both failures are collected in the report.
    pub async fn persist_attachments(&self, store: &dyn FileStorage) -> PersistReport {
        let mut report = PersistReport::default();
        let attachments = self.extract_attachments();
        if attachments.is_empty() {
            return report;
        }

        debug!(count = attachments.len(), location = %store.location(), "Saving attachments");
        let email = String::from_utf8_lossy(&self.serialize()).into_owned();

        for attachment in attachments {
            let digest = attachment.digest();
            let content_name = AttachmentRecord::content_file_name(&digest);

            let attachment_path = match store.store(&content_name, &attachment.content).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(name = %attachment.filename, error = %e, "Failed to save attachment");
                    report.errors.push(e);
                    format!("{}/{}", store.location(), content_name)
                }
            };

            let record = AttachmentRecord {
                name: attachment.filename.clone(),
                size: attachment.content.len() as u64,
                from: self.peer.clone(),
                mailed_from: self.sender.clone(),
                to: self.recipients.clone(),
                email: email.clone(),
                attachment_path,
                digest: digest.clone(),
            };

            let sidecar = match serde_json::to_vec_pretty(&record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    report
                        .errors
                        .push(Error::Internal(format!("Failed to encode sidecar: {}", e)));
                    continue;
                }
            };

            match store
                .store(&AttachmentRecord::sidecar_file_name(&digest), &sidecar)
                .await
            {
                Ok(_) => report.records.push(record),
                Err(e) => {
                    warn!(name = %attachment.filename, error = %e, "Failed to save attachment sidecar");
                    report.errors.push(e);
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("peer", &self.peer)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("length", &self.raw_body.len())
            .finish()
    }
}

impl std::fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.serialize()))
    }
}

/// Recover the raw body from a file written by [`MessageEnvelope::persist`]
pub fn strip_serialized(data: &[u8]) -> &[u8] {
    let mut rest = data;
    while rest.starts_with(HEADER_MARKER.as_bytes()) {
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return &[],
        }
    }
    rest
}

/// Make an arbitrary string usable as a single file name component
pub fn sanitize_file_component(value: &str) -> String {
    let trimmed = value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>');

    let mut out: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect();

    while out.contains("..") {
        out = out.replace("..", "_");
    }

    if out.is_empty() || out.chars().all(|c| c == '.') {
        return "_".to_string();
    }

    out
}
