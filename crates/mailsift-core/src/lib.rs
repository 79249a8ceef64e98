//! mailsift Core - content-inspecting mail relay
//!
//! This crate provides the message envelope model, the pluggable scanning
//! engines, the forward/quarantine/block decision pipeline and the thin
//! adapters that connect it to an SMTP listener and a next-hop relay.

pub mod delivery;
pub mod envelope;
pub mod relay;
pub mod scan;
pub mod smtp;

pub use delivery::{Delivery, SmtpDelivery};
pub use envelope::{Attachment, AttachmentRecord, MailParserWalker, MessageEnvelope, MimeWalker};
pub use relay::{DeliveryGate, InspectionRelay, ScanStrategy};
pub use scan::{build_engine, AlwaysPass, PatternMatch, ScanEngine};
pub use smtp::{RelayHandler, SmtpListener};
