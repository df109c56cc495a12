//! Clearance-based authorization and audit
//!
//! Building blocks for gating requests from registered network devices:
//!
//! - [`model`] - clearance values, layers, device classes and token addressing
//! - [`registry`] - thread-safe device registry with a token index
//! - [`policy`] - priority-ordered policy engine with load-time conflict detection
//! - [`audit`] - fan-out audit logger and its writers
//! - [`gate`] - the enforcement gate tying the above together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use clearance_authz::{
//!     AuditLogger, Clearance, ClearanceGate, Device, DeviceClass, DeviceRegistry, Layer,
//!     PolicyEngine, RequestAttributes,
//! };
//!
//! let registry = Arc::new(DeviceRegistry::new());
//! registry
//!     .register(Device::new(1, Layer::Control, DeviceClass::Controller, Clearance::LEVEL_4, "plc-1"))
//!     .unwrap();
//!
//! let policy = Arc::new(PolicyEngine::with_registry(Arc::clone(&registry)));
//! policy
//!     .load_from_json(br#"{"version":"1.0","rules":[
//!         {"id":"ops","name":"Operations","effect":"allow",
//!          "routes":["/ops"],"methods":["GET"],"required_clearance":67372036}
//!     ]}"#)
//!     .unwrap();
//!
//! let gate = ClearanceGate::new(registry, policy, Arc::new(AuditLogger::new()));
//! let outcome = gate.check(&RequestAttributes::new("GET", "/ops").with_device_id("1"));
//! assert!(outcome.is_pass());
//! ```

pub mod audit;
pub mod error;
pub mod gate;
pub mod model;
pub mod policy;
pub mod registry;

pub use audit::{
    AuditDecision, AuditEvent, AuditLogger, AuditWriter, BatchWriter, FileWriter, MemoryWriter,
    StdoutWriter,
};
pub use error::{AuditError, ModelError, PolicyError, RegistryError};
pub use gate::{
    ClearanceContext, ClearanceGate, GateOutcome, Rejection, RejectionBody, RejectionKind,
    RequestAttributes,
};
pub use model::{
    can_access_layer, compute_token, Clearance, Device, DeviceClass, DeviceId, Layer, TokenId,
    TokenOffset,
};
pub use policy::{
    Effect, Policy, PolicyContext, PolicyDecision, PolicyDocument, PolicyEngine, Rule,
    RuleConflict, RuleDocument,
};
pub use registry::DeviceRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
