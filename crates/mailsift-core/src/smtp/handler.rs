//! SMTP session handler
//!
//! Bridges one `mailin-embedded` session to the inspection relay. Each
//! connection gets its own clone; the relay itself is shared.

use crate::relay::InspectionRelay;
use mailin_embedded::response::{INTERNAL_ERROR, OK};
use mailin_embedded::{Handler, Response};
use mailsift_common::types::NULL_SENDER;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Per-connection state plus the shared relay
#[derive(Clone)]
pub struct RelayHandler {
    relay: Arc<InspectionRelay>,
    runtime: Handle,
    max_message_size: usize,
    peer: String,
    sender: String,
    recipients: Vec<String>,
    body: Vec<u8>,
    oversized: bool,
}

impl RelayHandler {
    /// Create a handler that drives `relay` on `runtime`
    pub fn new(relay: Arc<InspectionRelay>, runtime: Handle, max_message_size: usize) -> Self {
        Self {
            relay,
            runtime,
            max_message_size,
            peer: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            body: Vec::new(),
            oversized: false,
        }
    }

    fn reset(&mut self) {
        self.sender.clear();
        self.recipients.clear();
        self.body.clear();
        self.oversized = false;
    }
}

/// SMTP hands over the null sender as an empty path
pub fn normalize_sender(from: &str) -> String {
    let from = from.trim();
    if from.is_empty() || from == NULL_SENDER {
        NULL_SENDER.to_string()
    } else {
        from.to_string()
    }
}

impl Handler for RelayHandler {
    fn helo(&mut self, ip: IpAddr, domain: &str) -> Response {
        debug!(peer = %ip, helo = %domain, "SMTP greeting");
        self.peer = ip.to_string();
        OK
    }

    fn mail(&mut self, ip: IpAddr, _domain: &str, from: &str) -> Response {
        self.reset();
        self.peer = ip.to_string();
        self.sender = normalize_sender(from);
        OK
    }

    fn rcpt(&mut self, to: &str) -> Response {
        self.recipients.push(to.to_string());
        OK
    }

    fn data_start(&mut self, _domain: &str, from: &str, _is8bit: bool, to: &[String]) -> Response {
        self.sender = normalize_sender(from);
        self.recipients = to.to_vec();
        self.body.clear();
        self.oversized = false;
        OK
    }

    fn data(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.oversized {
            return Ok(());
        }

        if self.body.len() + buf.len() > self.max_message_size {
            warn!(
                peer = %self.peer,
                limit = self.max_message_size,
                "Message exceeds size limit, discarding"
            );
            self.oversized = true;
            self.body = Vec::new();
            return Ok(());
        }

        self.body.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        if self.oversized {
            self.reset();
            return INTERNAL_ERROR;
        }

        let body = std::mem::take(&mut self.body);
        let recipients = std::mem::take(&mut self.recipients);

        let disposition = self.runtime.block_on(self.relay.handle(
            &self.peer,
            &self.sender,
            recipients,
            body,
        ));

        info!(
            peer = %self.peer,
            malicious = disposition.verdict.is_malicious(),
            delivered = disposition.delivered,
            attachments = disposition.attachment_count,
            "Message processed"
        );

        self.reset();
        OK
    }
}
