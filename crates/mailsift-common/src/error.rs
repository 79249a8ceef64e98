//! Error types for mailsift

use thiserror::Error;

/// Main error type for mailsift
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rule error: {0}")]
    Rules(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for mailsift
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Rules(_) => "RULES_ERROR",
            Error::Scan(_) => "SCAN_ERROR",
            Error::Delivery(_) => "DELIVERY_ERROR",
            Error::Smtp(_) => "SMTP_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
