//! Persisted attachment artifacts

use serde::{Deserialize, Serialize};

/// Extension of the raw attachment bytes
pub const CONTENT_EXTENSION: &str = "file";

/// Extension of the metadata sidecar
pub const SIDECAR_EXTENSION: &str = "json";

/// Metadata written next to every persisted attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Original filename
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Originating peer
    pub from: String,
    /// Envelope sender
    pub mailed_from: String,
    /// Envelope recipients
    pub to: Vec<String>,
    /// Full serialized envelope
    pub email: String,
    /// Where the raw bytes were written
    pub attachment_path: String,
    /// Content digest
    pub digest: String,
}

impl AttachmentRecord {
    /// File name of the content artifact for `digest`
    pub fn content_file_name(digest: &str) -> String {
        format!("{}.{}", digest, CONTENT_EXTENSION)
    }

    /// File name of the sidecar for `digest`
    pub fn sidecar_file_name(digest: &str) -> String {
        format!("{}.{}", digest, SIDECAR_EXTENSION)
    }
}

/// Result of persisting every attachment of one envelope
#[derive(Debug, Default)]
pub struct PersistReport {
    /// Sidecars that were written
    pub records: Vec<AttachmentRecord>,
    /// Individual write failures, content and sidecar reported separately
    pub errors: Vec<mailsift_common::Error>,
}

impl PersistReport {
    /// Whether every write succeeded
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert_eq!(AttachmentRecord::content_file_name("ab12"), "ab12.file");
        assert_eq!(AttachmentRecord::sidecar_file_name("ab12"), "ab12.json");
    }

    #[test]
    fn test_record_field_names() {
        let record = AttachmentRecord {
            name: "a.exe".to_string(),
            size: 3,
            from: "10.0.0.1".to_string(),
            mailed_from: "x@example.com".to_string(),
            to: vec!["y@example.com".to_string()],
            email: "MAILSIFT: ...".to_string(),
            attachment_path: "/tmp/ab12.file".to_string(),
            digest: "ab12".to_string(),
        };

        let value = serde_json::to_value(&record).unwrap();
        for field in [
            "name",
            "size",
            "from",
            "mailed_from",
            "to",
            "email",
            "attachment_path",
            "digest",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
    }
}
