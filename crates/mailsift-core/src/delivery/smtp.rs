//! Delivery to a next-hop SMTP server

use super::Delivery;
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailsift_common::config::RelayConfig;
use mailsift_common::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Forwards messages verbatim over plain SMTP
pub struct SmtpDelivery {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    target: String,
}

impl SmtpDelivery {
    /// Create a transport for the configured next hop
    ///
    /// No connection is made until the first delivery.
    pub fn new(config: &RelayConfig) -> Self {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Self {
            mailer,
            target: format!("{}:{}", config.host, config.port),
        }
    }

    /// `host:port` of the next hop
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Delivery for SmtpDelivery {
    async fn deliver(&self, sender: &str, recipients: &[String], raw_body: &[u8]) -> Result<()> {
        let envelope = build_envelope(sender, recipients)?;

        let response = self
            .mailer
            .send_raw(&envelope, raw_body)
            .await
            .map_err(|e| Error::Delivery(format!("Relay to {} failed: {}", self.target, e)))?;

        debug!(target_host = %self.target, code = %response.code(), "Relay accepted message");
        Ok(())
    }
}

impl std::fmt::Debug for SmtpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpDelivery")
            .field("target", &self.target)
            .finish()
    }
}

/// SMTP envelope for the next hop; the null sender maps to an empty reverse path
fn build_envelope(sender: &str, recipients: &[String]) -> Result<Envelope> {
    let from = match strip_brackets(sender) {
        "" => None,
        address => Some(parse_address(address)?),
    };

    let to = recipients
        .iter()
        .map(|r| parse_address(strip_brackets(r)))
        .collect::<Result<Vec<_>>>()?;

    Envelope::new(from, to).map_err(|e| Error::Delivery(format!("Invalid envelope: {}", e)))
}

fn strip_brackets(address: &str) -> &str {
    let address = address.trim();
    address
        .strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
        .unwrap_or(address)
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|e| Error::Delivery(format!("Invalid address '{}': {}", address, e)))
}
