//! File storage abstraction

use async_trait::async_trait;
use mailsift_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a file, replacing any previous content, and return its full path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Human-readable location of this store, for logging
    fn location(&self) -> String;
}

/// Local filesystem storage
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance rooted at `path`, creating it if needed
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Verify the directory accepts writes by creating and removing a probe file
    pub async fn probe_writable(&self) -> Result<()> {
        let probe = self.base_path.join(".mailsift-write-probe");

        fs::write(&probe, b"probe").await.map_err(|e| {
            Error::Storage(format!(
                "Cannot write to directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        fs::remove_file(&probe)
            .await
            .map_err(|e| Error::Storage(format!("Failed to remove probe file: {}", e)))?;

        Ok(())
    }

    /// Get full path for a relative path, with path traversal protection
    fn full_path(&self, path: &str) -> std::result::Result<PathBuf, Error> {
        if path.is_empty() {
            return Err(Error::Storage("Empty file name".to_string()));
        }

        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage(
                "Absolute paths are not allowed".to_string(),
            ));
        }

        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", full_path.display(), e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", full_path.display(), e)))?;

        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush {}: {}", full_path.display(), e)))?;

        debug!(path = %full_path.display(), size = data.len(), "Stored file");

        Ok(full_path.display().to_string())
    }

    fn location(&self) -> String {
        self.base_path.display().to_string()
    }
}
