//! Pull attachments out of a persisted message

use anyhow::{Context, Result};
use mailsift_core::envelope::{sanitize_file_component, strip_serialized};
use mailsift_core::MessageEnvelope;
use mailsift_storage::{FileStorage, LocalStorage};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of one extraction run
#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// Paths written
    pub written: Vec<String>,
    /// Attachments that could not be written
    pub failed: usize,
}

/// Write every attachment of `infile` below `output_path`
///
/// Accepts both files written by the relay and plain RFC 5322 messages.
/// Individual write failures are logged and skipped.
pub async fn run(infile: &Path, output_path: &Path) -> Result<ExtractSummary> {
    info!(path = %infile.display(), "Reading message");
    let data = tokio::fs::read(infile)
        .await
        .with_context(|| format!("Cannot open message file {}", infile.display()))?;

    let envelope = MessageEnvelope::new("", "", Vec::new(), strip_serialized(&data));
    let store = LocalStorage::from_path(output_path)?;

    let mut summary = ExtractSummary::default();
    for attachment in envelope.extract_attachments() {
        let name = sanitize_file_component(&attachment.filename);
        info!(name = %name, size = attachment.content.len(), "Writing attachment");

        match store.store(&name, &attachment.content).await {
            Ok(path) => summary.written.push(path),
            Err(e) => {
                warn!(name = %name, error = %e, "Cannot write attachment, skipping");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
