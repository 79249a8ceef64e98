//! Rule files and their compiled form
//!
//! Every string of every rule, across all namespaces, is compiled into one
//! [`RegexSet`]. A single pass over the content reports which strings hit;
//! each rule's condition is then evaluated from those hits.

use mailsift_common::{Error, Result};
use regex::bytes::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Contents of one rule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDefinition>,
}

/// A named detection rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Rule name, unique within its file
    pub name: String,
    /// Rule description
    #[serde(default)]
    pub description: String,
    /// How many strings must hit
    #[serde(default)]
    pub condition: Condition,
    /// Whether the rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Strings to look for
    #[serde(default)]
    pub strings: Vec<PatternString>,
}

fn default_true() -> bool {
    true
}

/// Rule condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// At least one string hits
    #[default]
    Any,
    /// Every string hits
    All,
}

/// One string of a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternString {
    pub kind: PatternKind,
    pub value: String,
    /// Case-insensitive match (text strings only)
    #[serde(default)]
    pub nocase: bool,
}

/// Type of pattern string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Literal text
    Text,
    /// Space-separated hex bytes, `??` matches any byte
    Hex,
    /// Regular expression over raw bytes, Unicode mode off
    Regex,
}

impl PatternString {
    /// Translate into a byte-regex source
    fn to_regex_source(&self) -> std::result::Result<String, String> {
        match self.kind {
            PatternKind::Text => {
                if self.value.is_empty() {
                    return Err("empty text string".to_string());
                }
                let escaped = regex::escape(&self.value);
                Ok(if self.nocase {
                    format!("(?i){}", escaped)
                } else {
                    escaped
                })
            }
            PatternKind::Hex => hex_to_regex(&self.value),
            PatternKind::Regex => {
                // `.` and classes match single bytes, not UTF-8 sequences
                let source = format!("(?-u:{})", self.value);
                Regex::new(&source).map_err(|e| format!("invalid regex: {}", e))?;
                Ok(source)
            }
        }
    }
}

/// `"4d 5a ?? 00"` -> `(?s-u:\x4d\x5a.\x00)`
fn hex_to_regex(value: &str) -> std::result::Result<String, String> {
    let digits: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    if digits.is_empty() {
        return Err("empty hex string".to_string());
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{}'", value));
    }

    let mut source = String::from("(?s-u:");
    let chars: Vec<char> = digits.chars().collect();
    for pair in chars.chunks(2) {
        match pair {
            ['?', '?'] => source.push('.'),
            [hi, lo] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                source.push_str("\\x");
                source.push(*hi);
                source.push(*lo);
            }
            _ => {
                return Err(format!(
                    "invalid hex byte '{}' in '{}'",
                    pair.iter().collect::<String>(),
                    value
                ))
            }
        }
    }
    source.push(')');

    Ok(source)
}

/// A rule that fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHit {
    pub namespace: String,
    pub rule: String,
}

#[derive(Debug)]
struct CompiledRule {
    namespace: String,
    name: String,
    condition: Condition,
    /// Indices into the shared set
    patterns: Vec<usize>,
}

/// Every enabled rule of every namespace, ready to scan
#[derive(Debug)]
pub struct CompiledRuleset {
    set: RegexSet,
    rules: Vec<CompiledRule>,
}

impl CompiledRuleset {
    /// Load and compile rule files keyed by namespace
    pub fn compile(sources: &[(String, PathBuf)]) -> Result<Self> {
        let mut loaded = Vec::with_capacity(sources.len());
        for (namespace, path) in sources {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::Rules(format!(
                    "Failed to read rule file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            loaded.push((namespace.clone(), text));
        }

        Self::from_sources(&loaded)
    }

    /// Compile rule-file text keyed by namespace
    pub fn from_sources(sources: &[(String, String)]) -> Result<Self> {
        let mut namespaces = HashSet::new();
        let mut patterns = Vec::new();
        let mut rules = Vec::new();

        for (namespace, text) in sources {
            if !namespaces.insert(namespace.as_str()) {
                return Err(Error::Rules(format!("Duplicate namespace '{}'", namespace)));
            }

            let file: RuleFile = toml::from_str(text).map_err(|e| {
                Error::Rules(format!("{}: failed to parse rule file: {}", namespace, e))
            })?;

            if file.rules.is_empty() {
                return Err(Error::Rules(format!("{}: rule file has no rules", namespace)));
            }

            let mut names = HashSet::new();
            for rule in &file.rules {
                if !names.insert(rule.name.as_str()) {
                    return Err(Error::Rules(format!(
                        "{}: duplicate rule name '{}'",
                        namespace, rule.name
                    )));
                }
                if rule.strings.is_empty() {
                    return Err(Error::Rules(format!(
                        "{}: rule '{}' has no strings",
                        namespace, rule.name
                    )));
                }

                let mut indices = Vec::with_capacity(rule.strings.len());
                for string in &rule.strings {
                    let source = string.to_regex_source().map_err(|e| {
                        Error::Rules(format!("{}: rule '{}': {}", namespace, rule.name, e))
                    })?;
                    indices.push(patterns.len());
                    patterns.push(source);
                }

                // Disabled rules are still validated
                if !rule.enabled {
                    continue;
                }

                rules.push(CompiledRule {
                    namespace: namespace.clone(),
                    name: rule.name.clone(),
                    condition: rule.condition,
                    patterns: indices,
                });
            }
        }

        let set = RegexSet::new(&patterns)
            .map_err(|e| Error::Rules(format!("Failed to compile rule set: {}", e)))?;

        Ok(Self { set, rules })
    }

    /// Rules that fire on `content`
    pub fn scan(&self, content: &[u8]) -> Vec<RuleHit> {
        let hits = self.set.matches(content);
        if !hits.matched_any() {
            return Vec::new();
        }

        self.rules
            .iter()
            .filter(|rule| match rule.condition {
                Condition::Any => rule.patterns.iter().any(|&i| hits.matched(i)),
                Condition::All => rule.patterns.iter().all(|&i| hits.matched(i)),
            })
            .map(|rule| RuleHit {
                namespace: rule.namespace.clone(),
                rule: rule.name.clone(),
            })
            .collect()
    }

    /// Number of enabled rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
