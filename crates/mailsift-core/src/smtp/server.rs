//! SMTP listener

use super::handler::RelayHandler;
use crate::relay::InspectionRelay;
use mailin_embedded::{Server, SslConfig};
use mailsift_common::config::SmtpConfig;
use mailsift_common::{Error, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Plain SMTP listener feeding the inspection relay
pub struct SmtpListener {
    config: SmtpConfig,
    hostname: String,
    relay: Arc<InspectionRelay>,
}

impl SmtpListener {
    pub fn new(config: SmtpConfig, hostname: impl Into<String>, relay: Arc<InspectionRelay>) -> Self {
        Self {
            config,
            hostname: hostname.into(),
            relay,
        }
    }

    /// Listen address as `host:port`
    pub fn address(&self) -> String {
        self.config.bind_address()
    }

    /// Bind and serve until the process exits
    ///
    /// Blocks the calling thread; run it off the async runtime. Each worker
    /// thread drives its pipeline on `runtime`.
    pub fn serve(self, runtime: Handle) -> Result<()> {
        let address = self.address();
        let handler = RelayHandler::new(self.relay, runtime, self.config.max_message_size);

        let mut server = Server::new(handler);
        server
            .with_name(self.hostname.as_str())
            .with_num_threads(self.config.max_connections)
            .with_ssl(SslConfig::None)
            .map_err(|e| Error::Smtp(format!("Failed to configure listener: {}", e)))?
            .with_addr(address.as_str())
            .map_err(|e| Error::Smtp(format!("Failed to bind {}: {}", address, e)))?;

        info!(
            address = %address,
            workers = self.config.max_connections,
            "SMTP listener started"
        );

        server
            .serve()
            .map_err(|e| Error::Smtp(format!("SMTP listener stopped: {}", e)))
    }
}

impl std::fmt::Debug for SmtpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpListener")
            .field("address", &self.config.bind_address())
            .field("hostname", &self.hostname)
            .finish()
    }
}
