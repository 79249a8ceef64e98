//! Mode strategies chosen once at construction

use mailsift_common::types::{OperatingMode, Verdict};

/// When delivery happens relative to scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Deliver immediately, scan afterwards (`block` unset)
    ForwardThenScan,
    /// Hold delivery until the verdict is clean (`block` set)
    ScanThenForward,
}

impl ScanStrategy {
    pub fn from_mode(mode: &OperatingMode) -> Self {
        if mode.block {
            ScanStrategy::ScanThenForward
        } else {
            ScanStrategy::ForwardThenScan
        }
    }

    /// Whether the message is handed over before the scan starts
    pub fn delivers_before_scan(&self) -> bool {
        matches!(self, ScanStrategy::ForwardThenScan)
    }

    /// Whether the message is handed over once `verdict` is known
    pub fn delivers_after_scan(&self, verdict: &Verdict) -> bool {
        matches!(self, ScanStrategy::ScanThenForward) && !verdict.is_malicious()
    }
}

/// Whether delivery reaches the next hop at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGate {
    /// Forward to the next hop
    Relay,
    /// Swallow everything (`always_block`)
    Sink,
}

impl DeliveryGate {
    pub fn from_mode(mode: &OperatingMode) -> Self {
        if mode.always_block {
            DeliveryGate::Sink
        } else {
            DeliveryGate::Relay
        }
    }

    pub fn allows(&self) -> bool {
        matches!(self, DeliveryGate::Relay)
    }
}

impl std::fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStrategy::ForwardThenScan => write!(f, "forward-then-scan"),
            ScanStrategy::ScanThenForward => write!(f, "scan-then-forward"),
        }
    }
}
