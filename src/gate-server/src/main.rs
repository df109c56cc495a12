//! Clearance gate server binary

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::Parser;
use clearance_gate_server::telemetry::{self, LogFormat};
use clearance_gate_server::{AppState, GateServerConfig, Profile, Server, ServerConfig};
use std::path::PathBuf;
use tracing::info;

/// Clearance-based authorization gate
#[derive(Parser, Debug)]
#[command(name = "clearance-gate")]
#[command(about = "HTTP gate enforcing device clearance policies")]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "CLEARANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment profile
    #[arg(long, value_enum, ignore_case = true, env = "CLEARANCE_PROFILE")]
    profile: Option<Profile>,

    /// Host to bind to
    #[arg(long, env = "CLEARANCE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CLEARANCE_PORT")]
    port: Option<u16>,

    /// Log level (debug|info|warn|error)
    #[arg(long, env = "CLEARANCE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json|text)
    #[arg(long, env = "CLEARANCE_LOG_FORMAT")]
    log_format: Option<String>,

    /// Policy document to load instead of the bundled default
    #[arg(long, env = "CLEARANCE_POLICY_FILE")]
    policy_file: Option<PathBuf>,

    /// Device list to register instead of the bundled examples
    #[arg(long, env = "CLEARANCE_DEVICES_FILE")]
    devices_file: Option<PathBuf>,

    /// Check clearance on every request (true|false)
    #[arg(long, env = "CLEARANCE_ENFORCEMENT", value_parser = BoolishValueParser::new())]
    enforcement: Option<bool>,

    /// Record audit events at all (true|false)
    #[arg(long, env = "CLEARANCE_AUDIT_ENABLED", value_parser = BoolishValueParser::new())]
    audit_enabled: Option<bool>,

    /// Write audit events to stdout (true|false)
    #[arg(long, env = "CLEARANCE_AUDIT_STDOUT", value_parser = BoolishValueParser::new())]
    audit_stdout: Option<bool>,

    /// Append audit events to this file
    #[arg(long, env = "CLEARANCE_AUDIT_FILE")]
    audit_file: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut GateServerConfig) {
        if let Some(profile) = self.profile {
            config.profile = profile;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = Some(level.to_ascii_lowercase());
        }
        if let Some(format) = self.log_format {
            config.log_format = format.to_ascii_lowercase();
        }
        if self.policy_file.is_some() {
            config.policy_file = self.policy_file;
        }
        if self.devices_file.is_some() {
            config.devices_file = self.devices_file;
        }
        if let Some(enabled) = self.enforcement {
            config.enforcement_enabled = enabled;
        }
        if let Some(enabled) = self.audit_enabled {
            config.audit.enabled = enabled;
        }
        if let Some(stdout) = self.audit_stdout {
            config.audit.stdout = stdout;
        }
        if self.audit_file.is_some() {
            config.audit.file = self.audit_file;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = GateServerConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    cli.apply(&mut config);
    config.apply_profile();
    config.validate().context("Invalid config")?;

    telemetry::init_tracing(config.log_level(), LogFormat::from_name(&config.log_format))?;

    info!(
        version = clearance_authz::VERSION,
        profile = ?config.profile,
        "Starting clearance gate"
    );

    let state = AppState::bootstrap(&config)?;

    let server = Server::new(
        ServerConfig {
            host: config.host.clone(),
            port: config.port,
        },
        state,
    );

    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "clearance-gate",
            "--profile",
            "PROD",
            "--port",
            "9443",
            "--log-level",
            "WARN",
            "--enforcement",
            "off",
            "--audit-stdout",
            "no",
            "--audit-file",
            "/var/log/gate/audit.jsonl",
        ])
        .unwrap();

        let mut config = GateServerConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.profile, Profile::Prod);
        assert_eq!(config.port, 9443);
        assert_eq!(config.log_level(), "warn");
        assert!(!config.enforcement_enabled);
        assert!(!config.audit.stdout);
        assert_eq!(config.audit.file, Some(PathBuf::from("/var/log/gate/audit.jsonl")));
    }

    #[test]
    fn test_flags_reject_garbage() {
        for args in [
            ["clearance-gate", "--port", "http"],
            ["clearance-gate", "--enforcement", "maybe"],
            ["clearance-gate", "--profile", "staging"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?} should be rejected");
        }
    }

    #[test]
    fn test_env_fills_unset_flags() {
        // Only this test touches the process environment
        std::env::set_var("CLEARANCE_HOST", "127.0.0.1");
        std::env::set_var("CLEARANCE_AUDIT_ENABLED", "false");

        let from_env = Cli::try_parse_from(["clearance-gate"]).unwrap();
        let overridden = Cli::try_parse_from(["clearance-gate", "--host", "10.0.0.5"]).unwrap();

        std::env::remove_var("CLEARANCE_HOST");
        std::env::remove_var("CLEARANCE_AUDIT_ENABLED");

        let mut config = GateServerConfig::default();
        from_env.apply(&mut config);
        assert_eq!(config.host, "127.0.0.1");
        assert!(!config.audit.enabled);

        let mut config = GateServerConfig::default();
        overridden.apply(&mut config);
        assert_eq!(config.host, "10.0.0.5");
    }
}
