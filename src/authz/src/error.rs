//! Error types for the clearance authorization core

use crate::model::{DeviceId, TokenId};
use crate::policy::RuleConflict;
use thiserror::Error;

/// Errors raised while parsing clearance model values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Layer tag outside data/transport/control/application
    #[error("invalid layer '{0}'")]
    InvalidLayer(String),

    /// Device class tag outside sensor/actuator/gateway/controller
    #[error("invalid device class '{0}'")]
    InvalidDeviceClass(String),

    /// Clearance value that is not a hex-encoded 32-bit integer
    #[error("invalid clearance format '{0}'")]
    InvalidClearance(String),
}

/// Device registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A device with this ID is already registered
    #[error("device {0} already registered")]
    AlreadyRegistered(DeviceId),

    /// No device with this ID
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// No device owns this token
    #[error("token {0} not found")]
    TokenNotFound(TokenId),

    /// The device ID is too large for its three tokens to fit the 16-bit token space
    #[error("device {0} is outside the addressable token range")]
    TokenOutOfRange(DeviceId),
}

/// Policy load and validation errors
///
/// Any of these aborts the load; the previously active policy stays in force.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Policy document without a version string
    #[error("policy version is required")]
    MissingVersion,

    /// Rule at `index` has an empty ID
    #[error("rule {index}: ID is required")]
    MissingRuleId {
        /// Position of the rule in the document
        index: usize,
    },

    /// Effect other than allow/deny
    #[error("rule {rule}: invalid effect '{effect}'")]
    InvalidEffect {
        /// Offending rule ID
        rule: String,
        /// Effect as written in the document
        effect: String,
    },

    /// Two rules share an ID
    #[error("rule {0}: duplicate rule ID")]
    DuplicateRuleId(String),

    /// Non-zero clearance outside levels 2-9
    #[error("rule {rule}: invalid clearance level 0x{value:08X}")]
    InvalidClearance {
        /// Offending rule ID
        rule: String,
        /// Raw clearance value
        value: u32,
    },

    /// Allowed layer outside the four known layers
    #[error("rule {rule}: invalid layer '{layer}'")]
    InvalidLayer {
        /// Offending rule ID
        rule: String,
        /// Layer tag as written in the document
        layer: String,
    },

    /// Allow or deny list names a device the registry does not know
    #[error("rule {rule}: unknown device {device}")]
    UnknownDevice {
        /// Offending rule ID
        rule: String,
        /// Unregistered device ID
        device: DeviceId,
    },

    /// Same-priority rules with opposite effects over overlapping scope
    #[error(
        "policy conflicts detected:\n  {}",
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  ")
    )]
    Conflicts(Vec<RuleConflict>),

    /// Malformed policy JSON
    #[error("failed to parse policy: {0}")]
    Parse(#[from] serde_json::Error),

    /// Policy file could not be read
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
}

/// Audit pipeline errors
///
/// Never fatal to a request; the gate logs them and carries on.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Event could not be encoded as JSON
    #[error("failed to marshal audit event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writer sink failed
    #[error("failed to write audit event: {0}")]
    Io(#[from] std::io::Error),

    /// Write attempted after the writer was closed
    #[error("audit writer '{0}' is closed")]
    Closed(&'static str),
}
