use crate::config::GateServerConfig;
use anyhow::{Context, Result};
use clearance_authz::{
    AuditLogger, BatchWriter, ClearanceGate, Device, DeviceRegistry, FileWriter, PolicyEngine,
    StdoutWriter,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Policy loaded when no policy file is configured
pub const DEFAULT_POLICY: &str = include_str!("../policies/default.json");

/// Devices registered when no devices file is configured
pub const EXAMPLE_DEVICES: &str = include_str!("../policies/devices.json");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditLogger>,
    pub gate: Arc<ClearanceGate>,

    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditLogger>,
        enforcement_enabled: bool,
    ) -> Self {
        let gate = ClearanceGate::new(Arc::clone(&registry), Arc::clone(&policy), Arc::clone(&audit))
            .with_enforcement(enforcement_enabled);

        Self {
            registry,
            policy,
            audit,
            gate: Arc::new(gate),
            start_time: Instant::now(),
        }
    }

    /// Build the registry, policy engine and audit pipeline from configuration
    pub fn bootstrap(config: &GateServerConfig) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let seeded = match &config.devices_file {
            Some(path) => register_devices(&registry, &read_file(path, "devices")?)?,
            None => register_devices(&registry, EXAMPLE_DEVICES)?,
        };
        info!(devices = seeded, "Device registry seeded");

        let policy = Arc::new(PolicyEngine::with_registry(Arc::clone(&registry)));
        match &config.policy_file {
            Some(path) => policy
                .load_from_file(path)
                .with_context(|| format!("Failed to load policy file: {}", path.display()))?,
            None => policy
                .load_from_json(DEFAULT_POLICY.as_bytes())
                .context("Failed to load bundled default policy")?,
        }

        let audit = Arc::new(build_audit_logger(config)?);

        Ok(Self::new(registry, policy, audit, config.enforcement_enabled))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))
}

/// Register every device in a JSON array, skipping ones the registry refuses
///
/// Returns the number registered.
pub fn register_devices(registry: &DeviceRegistry, json: &str) -> Result<usize> {
    let devices: Vec<Device> = serde_json::from_str(json).context("Failed to parse device list")?;

    let mut registered = 0;
    for device in devices {
        let name = device.name.clone();
        match registry.register(device) {
            Ok(_) => registered += 1,
            Err(e) => error!(device = %name, error = %e, "Failed to register device"),
        }
    }

    Ok(registered)
}

fn build_audit_logger(config: &GateServerConfig) -> Result<AuditLogger> {
    let logger = AuditLogger::new();
    logger.set_enabled(config.audit.enabled);

    if config.audit.stdout {
        logger.add_writer(Arc::new(StdoutWriter::new()));
    }

    if let Some(path) = &config.audit.file {
        let writer = FileWriter::open(path)
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;
        logger.add_writer(Arc::new(writer));
    }

    if let Some(batch) = &config.audit.batch {
        logger.add_writer(Arc::new(
            BatchWriter::new(&batch.endpoint, &batch.bucket).with_batch_size(batch.batch_size),
        ));
    }

    info!(
        enabled = logger.is_enabled(),
        writers = logger.writer_count(),
        "Audit logger configured"
    );

    Ok(logger)
}
