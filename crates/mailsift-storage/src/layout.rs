//! On-disk layout: messages, quarantine and attachments directories

use crate::file::{FileStorage, LocalStorage};
use mailsift_common::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Subdirectory for messages logged regardless of verdict
pub const MESSAGES_DIR: &str = "messages";

/// Subdirectory for flagged messages
pub const QUARANTINE_DIR: &str = "quarantine";

/// Subdirectory for content-addressed attachments
pub const ATTACHMENTS_DIR: &str = "attachments";

/// The three stores the inspection pipeline writes to
#[derive(Clone)]
pub struct StorageLayout {
    /// Every received message when `log_all` is set
    pub messages: Arc<dyn FileStorage>,
    /// Messages with a malicious verdict
    pub quarantine: Arc<dyn FileStorage>,
    /// Extracted attachments and their sidecars
    pub attachments: Arc<dyn FileStorage>,
}

impl StorageLayout {
    /// Create (if needed) the three subdirectories below `base`
    pub fn create(base: &Path) -> Result<Self> {
        let messages = LocalStorage::from_path(&base.join(MESSAGES_DIR))?;
        let quarantine = LocalStorage::from_path(&base.join(QUARANTINE_DIR))?;
        let attachments = LocalStorage::from_path(&base.join(ATTACHMENTS_DIR))?;

        info!(base = %base.display(), "Storage layout ready");

        Ok(Self {
            messages: Arc::new(messages),
            quarantine: Arc::new(quarantine),
            attachments: Arc::new(attachments),
        })
    }

    /// Create the layout and check every directory is writable
    pub async fn create_checked(base: &Path) -> Result<Self> {
        for dir in [MESSAGES_DIR, QUARANTINE_DIR, ATTACHMENTS_DIR] {
            LocalStorage::from_path(&base.join(dir))?
                .probe_writable()
                .await?;
        }
        Self::create(base)
    }
}

impl std::fmt::Debug for StorageLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLayout")
            .field("messages", &self.messages.location())
            .field("quarantine", &self.quarantine.location())
            .field("attachments", &self.attachments.location())
            .finish()
    }
}
