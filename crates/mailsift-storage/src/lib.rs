//! mailsift Storage - File storage abstraction
//!
//! This crate provides the filesystem layer used to persist logged
//! messages, quarantined messages and extracted attachments.

pub mod file;
pub mod layout;

pub use file::{FileStorage, LocalStorage};
pub use layout::StorageLayout;
