//! Scanning engines
//!
//! An engine answers one question about a byte buffer: does it look
//! malicious. Engines are built once at startup and shared read-only
//! between every connection.

mod always_pass;
mod pattern;
pub mod rules;

pub use always_pass::AlwaysPass;
pub use pattern::PatternMatch;
pub use rules::{CompiledRuleset, RuleHit};

use mailsift_common::config::{EngineConfig, EngineKind};
use mailsift_common::Result;
use std::sync::Arc;
use tracing::Span;

/// A content scanner
pub trait ScanEngine: Send + Sync {
    /// Short engine name used in findings and logs
    fn name(&self) -> &str;

    /// Whether `content` should be treated as malicious
    fn matches(&self, content: &[u8]) -> Result<bool>;

    /// One-line description for the startup banner
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

/// Instantiate the engine described by `config`
///
/// Rule-file problems surface here, before the listener starts.
pub fn build_engine(config: &EngineConfig, span: &Span) -> Result<Arc<dyn ScanEngine>> {
    match config.kind {
        EngineKind::AlwaysPass => Ok(Arc::new(AlwaysPass)),
        EngineKind::Pattern => {
            let engine = PatternMatch::new(config.rule_namespaces(), span.clone())?;
            Ok(Arc::new(engine))
        }
    }
}
