//! Outbound delivery of accepted messages

mod smtp;

pub use smtp::SmtpDelivery;

use async_trait::async_trait;
use mailsift_common::Result;

/// Hands a message to the next hop
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Forward the raw message bytes unchanged
    async fn deliver(&self, sender: &str, recipients: &[String], raw_body: &[u8]) -> Result<()>;
}
