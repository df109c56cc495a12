//! Gate server configuration loading and validation
//!
//! Sources, lowest precedence first: built-in defaults, a JSON config file,
//! then command-line flags (each also read from a `CLEARANCE_*` variable by
//! the binary). Profile rules are applied last.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "text"];

/// Deployment profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Dev,
    Test,
    Prod,
    Dsmil,
}

impl Profile {
    /// Log level used when none is configured
    pub const fn default_log_level(self) -> &'static str {
        match self {
            Profile::Dev => "debug",
            Profile::Test | Profile::Dsmil => "info",
            Profile::Prod => "warn",
        }
    }
}

/// Complete gate server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Explicit log level; falls back to the profile's default
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub profile: Profile,

    #[serde(default = "default_true")]
    pub enforcement_enabled: bool,

    /// Policy document to load at startup instead of the bundled default
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Devices to register at startup instead of the bundled examples
    #[serde(default)]
    pub devices_file: Option<PathBuf>,

    #[serde(default)]
    pub audit: AuditSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub batch: Option<BatchSection>,
}

/// Object-store batching target; stays disabled until an uploader exists
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSection {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_true() -> bool { true }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_format() -> String { "json".to_string() }
fn default_batch_size() -> usize { clearance_authz::audit::DEFAULT_BATCH_SIZE }

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout: true,
            file: None,
            batch: None,
        }
    }
}

impl Default for GateServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: None,
            log_format: default_log_format(),
            profile: Profile::default(),
            enforcement_enabled: true,
            policy_file: None,
            devices_file: None,
            audit: AuditSection::default(),
        }
    }
}

impl GateServerConfig {
    /// Read configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Defaults, or the given file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply profile rules; runs after every other source
    pub fn apply_profile(&mut self) {
        if self.profile == Profile::Dsmil {
            self.enforcement_enabled = true;
        }
    }

    /// Configured log level, or the profile default
    pub fn log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .unwrap_or_else(|| self.profile.default_log_level())
    }

    /// Bind address as `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("Invalid server port: 0");
        }

        if !LOG_LEVELS.contains(&self.log_level()) {
            bail!("Invalid log level: {}", self.log_level());
        }

        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            bail!("Invalid log format: {}", self.log_format);
        }

        for (what, path) in [("Policy", &self.policy_file), ("Devices", &self.devices_file)] {
            if let Some(path) = path {
                if !path.exists() {
                    bail!("{} file does not exist: {}", what, path.display());
                }
            }
        }

        if let Some(batch) = &self.audit.batch {
            if batch.batch_size == 0 {
                bail!("Audit batch size must be greater than zero");
            }
        }

        Ok(())
    }
}
