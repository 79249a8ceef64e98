//! Common types for mailsift

use serde::{Deserialize, Serialize};

/// Envelope sender used by SMTP for bounces and other null-sender mail
pub const NULL_SENDER: &str = "<>";

/// Operating mode flags
///
/// The three flags are independent; their combinations are meaningful.
/// `always_block` only ever suppresses delivery, it never suppresses
/// scanning or quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperatingMode {
    /// Hold delivery until the verdict is known
    #[serde(default)]
    pub block: bool,

    /// Never deliver anything (capture sink)
    #[serde(default)]
    pub always_block: bool,

    /// Persist every received message to the messages directory
    #[serde(default)]
    pub log_all: bool,
}

impl OperatingMode {
    /// Create a mode from its three flags
    pub fn new(block: bool, always_block: bool, log_all: bool) -> Self {
        Self {
            block,
            always_block,
            log_all,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "block={} always_block={} log_all={}",
            self.block, self.always_block, self.log_all
        )
    }
}

/// What an engine reported for one attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum FindingOutcome {
    /// At least one rule fired
    Matched,
    /// The engine failed while scanning
    Faulted(String),
}

/// A positive (attachment, engine) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Attachment filename
    pub attachment: String,
    /// Engine name
    pub engine: String,
    /// Match or fault
    #[serde(flatten)]
    pub outcome: FindingOutcome,
}

/// Per-message scan verdict
///
/// A message is malicious as soon as a single engine matched, or failed on,
/// a single attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Positive results, in scan order
    pub findings: Vec<Finding>,
}

impl Verdict {
    /// A verdict with no findings
    pub fn clean() -> Self {
        Self::default()
    }

    /// Record a positive result
    pub fn record(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Whether any engine flagged any attachment
    pub fn is_malicious(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Number of findings caused by engine failures
    pub fn fault_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f.outcome, FindingOutcome::Faulted(_)))
            .count()
    }
}

/// Outcome of one pass through the inspection pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposition {
    /// Aggregate scan verdict
    pub verdict: Verdict,
    /// Whether the message was handed to the delivery collaborator
    pub delivered: bool,
    /// Path of the quarantine copy, if one was written
    pub quarantine_path: Option<String>,
    /// Number of extracted attachments
    pub attachment_count: usize,
}
