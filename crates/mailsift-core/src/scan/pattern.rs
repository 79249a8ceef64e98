//! Rule-file driven pattern matcher

use super::rules::CompiledRuleset;
use super::ScanEngine;
use crate::envelope::content_digest;
use mailsift_common::Result;
use std::path::PathBuf;
use tracing::{info, Span};

/// Engine backed by compiled rule files
pub struct PatternMatch {
    ruleset: CompiledRuleset,
    sources: Vec<(String, PathBuf)>,
    span: Span,
}

impl PatternMatch {
    /// Load and compile every rule file, keyed by namespace
    pub fn new(sources: Vec<(String, PathBuf)>, span: Span) -> Result<Self> {
        let ruleset = CompiledRuleset::compile(&sources)?;

        info!(
            parent: &span,
            namespaces = sources.len(),
            rules = ruleset.rule_count(),
            "Compiled pattern rules"
        );

        Ok(Self {
            ruleset,
            sources,
            span,
        })
    }

    /// Wrap an already compiled ruleset
    pub fn from_ruleset(ruleset: CompiledRuleset, span: Span) -> Self {
        Self {
            ruleset,
            sources: Vec::new(),
            span,
        }
    }
}

impl ScanEngine for PatternMatch {
    fn name(&self) -> &str {
        "pattern"
    }

    fn matches(&self, content: &[u8]) -> Result<bool> {
        let hits = self.ruleset.scan(content);
        if hits.is_empty() {
            return Ok(false);
        }

        let digest = content_digest(content);
        for hit in &hits {
            info!(
                parent: &self.span,
                rule = %hit.rule,
                namespace = %hit.namespace,
                digest = %digest,
                "Rule matched"
            );
        }

        Ok(true)
    }

    fn describe(&self) -> String {
        if self.sources.is_empty() {
            return format!("{} ({} rules)", self.name(), self.ruleset.rule_count());
        }

        let files: Vec<String> = self
            .sources
            .iter()
            .map(|(namespace, path)| format!("{}={}", namespace, path.display()))
            .collect();
        format!("{} [{}]", self.name(), files.join(", "))
    }
}

impl std::fmt::Debug for PatternMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatch")
            .field("sources", &self.sources)
            .field("rules", &self.ruleset.rule_count())
            .finish()
    }
}
