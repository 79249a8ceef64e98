use super::ScanEngine;
use mailsift_common::Result;

/// Engine that never flags anything
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPass;

impl ScanEngine for AlwaysPass {
    fn name(&self) -> &str {
        "always_pass"
    }

    fn matches(&self, _content: &[u8]) -> Result<bool> {
        Ok(false)
    }
}
