//! Configuration for mailsift

use crate::types::OperatingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Inbound SMTP listener configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Next-hop relay configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Operating mode flags
    #[serde(default)]
    pub mode: OperatingMode,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scanning engines, consulted in order
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname announced in the SMTP banner
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Inbound SMTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Bind host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Maximum concurrent connections (worker threads)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl SmtpConfig {
    /// Listen address as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_smtp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_max_connections() -> u32 {
    16
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024 // 25 MB
}

/// Next-hop relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Remote host that receives forwarded mail
    #[serde(default = "default_relay_host")]
    pub host: String,

    /// Remote port
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Per-delivery timeout in seconds
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            timeout_secs: default_relay_timeout(),
        }
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    25
}

fn default_relay_timeout() -> u64 {
    30
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory holding `messages/`, `quarantine/` and `attachments/`
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Persist every extracted attachment
    #[serde(default)]
    pub save_attachments: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            save_attachments: false,
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/tmp/mailsift")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Scanning engine implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Never flags anything
    AlwaysPass,
    /// Rule-file driven pattern matcher
    Pattern,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::AlwaysPass => write!(f, "always_pass"),
            EngineKind::Pattern => write!(f, "pattern"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "always_pass" | "pass" => Ok(EngineKind::AlwaysPass),
            "pattern" | "rules" => Ok(EngineKind::Pattern),
            other => Err(crate::Error::Config(format!(
                "Unknown engine kind: {}",
                other
            ))),
        }
    }
}

/// One configured scanning engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Implementation to instantiate
    pub kind: EngineKind,

    /// Rule files, in load order
    #[serde(default)]
    pub rules: Vec<PathBuf>,
}

impl EngineConfig {
    /// Name each rule file with a positional namespace (`ruleset0`, `ruleset1`, ...)
    pub fn rule_namespaces(&self) -> Vec<(String, PathBuf)> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, path)| (format!("ruleset{}", i), path.clone()))
            .collect()
    }

    /// Parse the command-line form `KIND[:RULE[,RULE...]]`
    pub fn parse_spec(spec: &str) -> crate::Result<Self> {
        let (kind, rules) = match spec.split_once(':') {
            Some((kind, rules)) => (kind, rules),
            None => (spec, ""),
        };

        let rules = rules
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(Self {
            kind: kind.parse()?,
            rules,
        })
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// First default location holding a configuration file
    pub fn locate() -> Option<PathBuf> {
        first_existing(&[
            PathBuf::from("./mailsift.toml"),
            PathBuf::from("/etc/mailsift/config.toml"),
        ])
    }

    /// Reject configurations the relay cannot start with
    pub fn validate(&self) -> crate::Result<()> {
        if self.engines.is_empty() {
            return Err(crate::Error::Config(
                "At least one scanning engine must be configured".to_string(),
            ));
        }

        for engine in &self.engines {
            if engine.kind == EngineKind::Pattern && engine.rules.is_empty() {
                return Err(crate::Error::Config(
                    "The pattern engine requires at least one rule file".to_string(),
                ));
            }
        }

        if self.smtp.max_connections == 0 {
            return Err(crate::Error::Config(
                "smtp.max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn first_existing(paths: &[PathBuf]) -> Option<PathBuf> {
    paths.iter().find(|path| path.exists()).cloned()
}
