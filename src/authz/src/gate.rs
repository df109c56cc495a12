//! Clearance enforcement gate
//!
//! Resolves a request's claimed identity against the device registry, asks
//! the policy engine for a decision, records exactly one audit event and
//! reports whether the request may pass.
//!
//! ```text
//! attributes → parse → token override → device lookup → policy → audit → Pass | Reject
//!                 │                          │
//!                 └──── 401 (actor unknown) ─┘
//! ```
//!
//! The gate is transport-agnostic: callers fill in [`RequestAttributes`]
//! from headers (or any equivalent) and map [`GateOutcome`] back onto their
//! protocol.

use crate::audit::{AuditDecision, AuditEvent, AuditLogger};
use crate::model::{Clearance, Device, DeviceId, Layer, TokenId, TokenOffset};
use crate::policy::{Effect, PolicyContext, PolicyDecision, PolicyEngine};
use crate::registry::DeviceRegistry;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the decimal device ID
pub const HEADER_DEVICE_ID: &str = "x-device-id";
/// Header carrying the layer tag
pub const HEADER_LAYER: &str = "x-layer";
/// Header carrying the hex clearance value
pub const HEADER_CLEARANCE: &str = "x-clearance";
/// Header carrying the decimal token ID
pub const HEADER_TOKEN_ID: &str = "x-token-id";

/// Actor recorded for requests rejected before identity resolution
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Raw, unvalidated attributes of an inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub method: String,
    pub route: String,

    /// Full request target; defaults to the route
    pub resource: String,

    pub device_id: Option<String>,
    pub layer: Option<String>,
    pub clearance: Option<String>,
    pub token_id: Option<String>,

    pub request_id: Option<String>,
    pub source_ip: Option<String>,
}

impl RequestAttributes {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        let route = route.into();
        Self {
            method: method.into(),
            resource: route.clone(),
            route,
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_device_id(mut self, value: impl Into<String>) -> Self {
        self.device_id = Some(value.into());
        self
    }

    pub fn with_layer(mut self, value: impl Into<String>) -> Self {
        self.layer = Some(value.into());
        self
    }

    pub fn with_clearance(mut self, value: impl Into<String>) -> Self {
        self.clearance = Some(value.into());
        self
    }

    pub fn with_token_id(mut self, value: impl Into<String>) -> Self {
        self.token_id = Some(value.into());
        self
    }

    pub fn with_request_id(mut self, value: impl Into<String>) -> Self {
        self.request_id = Some(value.into());
        self
    }

    pub fn with_source_ip(mut self, value: impl Into<String>) -> Self {
        self.source_ip = Some(value.into());
        self
    }
}

/// Identity resolved for a request that passed the gate
///
/// Handed to downstream handlers as request-scoped state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearanceContext {
    /// Registry record of the requesting device, when one was identified
    pub device: Option<Device>,
    pub device_id: Option<DeviceId>,
    pub clearance: Option<Clearance>,
    pub layer: Option<Layer>,
    pub token: Option<(TokenId, TokenOffset)>,
    pub request_id: Option<String>,
}

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Malformed or unresolvable identity attributes
    Unauthorized,
    /// Denied by policy
    Forbidden,
}

impl RejectionKind {
    pub const fn status_code(self) -> u16 {
        match self {
            RejectionKind::Unauthorized => 401,
            RejectionKind::Forbidden => 403,
        }
    }

    pub const fn error(self) -> &'static str {
        match self {
            RejectionKind::Unauthorized => "unauthorized",
            RejectionKind::Forbidden => "access denied",
        }
    }
}

/// Rejected request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,

    /// Denying rule, for policy rejections that matched a rule
    pub rule_id: Option<String>,
}

impl Rejection {
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Response body `{error, reason}`
    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            error: self.kind.error().to_string(),
            reason: self.reason.clone(),
        }
    }
}

/// Structured rejection body returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    pub error: String,
    pub reason: String,
}

/// Terminal state of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass(ClearanceContext),
    Reject(Rejection),
}

impl GateOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateOutcome::Pass(_))
    }
}

/// Identity after header parsing, before registry resolution
#[derive(Debug, Default)]
struct ClaimedIdentity {
    device_id: Option<DeviceId>,
    layer: Option<Layer>,
    clearance: Option<Clearance>,
    token_id: Option<TokenId>,
}

/// Clearance enforcement gate
pub struct ClearanceGate {
    registry: Arc<DeviceRegistry>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
    enabled: bool,
}

impl ClearanceGate {
    /// Create an enforcing gate
    pub fn new(registry: Arc<DeviceRegistry>, policy: Arc<PolicyEngine>, audit: Arc<AuditLogger>) -> Self {
        Self {
            registry,
            policy,
            audit,
            enabled: true,
        }
    }

    /// Turn enforcement on or off; a disabled gate passes everything unaudited
    pub fn with_enforcement(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Run a request through the gate
    pub fn check(&self, request: &RequestAttributes) -> GateOutcome {
        if !self.enabled {
            return GateOutcome::Pass(ClearanceContext {
                request_id: request.request_id.clone(),
                ..ClearanceContext::default()
            });
        }

        let claimed = match parse_claims(request) {
            Ok(claimed) => claimed,
            Err(reason) => return self.unauthorized(request, reason),
        };

        let mut device_id = claimed.device_id;
        let mut layer = claimed.layer;
        let mut clearance = claimed.clearance;
        let mut token = None;

        // Token identity overrides whatever device/layer/clearance was claimed
        if let Some(token_id) = claimed.token_id {
            match self.registry.get_by_token(token_id) {
                Ok((device, offset)) => {
                    device_id = Some(device.id);
                    layer = Some(device.layer);
                    clearance = Some(device.clearance);
                    token = Some((token_id, offset));
                }
                Err(e) => debug!(token = token_id, error = %e, "Token not resolved; using claimed identity"),
            }
        }

        let device = match device_id {
            Some(id) => match self.registry.get_by_id(id) {
                Ok(device) => Some(device),
                Err(_) => {
                    warn!(device_id = id, route = %request.route, "Device not registered");
                    return self.unauthorized(request, "device not registered");
                }
            },
            None => None,
        };

        if let Some(device) = &device {
            clearance.get_or_insert(device.clearance);
            layer.get_or_insert(device.layer);
        }

        let policy_ctx = PolicyContext {
            route: request.route.clone(),
            method: request.method.clone(),
            device_id,
            layer,
            clearance: clearance.unwrap_or(Clearance::NONE),
            request_id: request.request_id.clone(),
            source_ip: request.source_ip.clone(),
            token,
        };

        let decision = self.policy.evaluate(&policy_ctx);
        self.record_decision(request, &policy_ctx, &decision);

        if decision.effect == Effect::Deny {
            warn!(
                rule = decision.rule_id.as_deref().unwrap_or("-"),
                reason = %decision.reason,
                device_id = ?device_id,
                clearance = ?clearance.map(Clearance::raw),
                route = %request.route,
                "Access denied by policy"
            );
            return GateOutcome::Reject(Rejection {
                kind: RejectionKind::Forbidden,
                reason: decision.reason,
                rule_id: decision.rule_id,
            });
        }

        GateOutcome::Pass(ClearanceContext {
            device,
            device_id,
            clearance,
            layer,
            token,
            request_id: request.request_id.clone(),
        })
    }

    fn record_decision(&self, request: &RequestAttributes, ctx: &PolicyContext, decision: &PolicyDecision) {
        let (audit_decision, status_code) = match decision.effect {
            Effect::Allow => (AuditDecision::Allow, None),
            Effect::Deny => (AuditDecision::Deny, Some(RejectionKind::Forbidden.status_code())),
        };

        let actor = ctx
            .device_id
            .map_or_else(|| "anonymous".to_string(), |id| format!("device-{}", id));

        let event = AuditEvent {
            actor,
            clearance: (!ctx.clearance.is_zero()).then_some(ctx.clearance),
            device_id: ctx.device_id,
            layer: ctx.layer,
            method: request.method.clone(),
            request_id: request.request_id.clone(),
            source_ip: request.source_ip.clone(),
            status_code,
            ..unstamped_event(audit_decision, request, &decision.reason)
        };

        self.emit(event);
    }

    fn unauthorized(&self, request: &RequestAttributes, reason: &str) -> GateOutcome {
        let event = AuditEvent {
            actor: UNKNOWN_ACTOR.to_string(),
            method: request.method.clone(),
            request_id: request.request_id.clone(),
            source_ip: request.source_ip.clone(),
            status_code: Some(RejectionKind::Unauthorized.status_code()),
            ..unstamped_event(AuditDecision::Deny, request, reason)
        };
        self.emit(event);

        GateOutcome::Reject(Rejection {
            kind: RejectionKind::Unauthorized,
            reason: reason.to_string(),
            rule_id: None,
        })
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.log(event) {
            warn!(error = %e, "Audit logging failed");
        }
    }
}

/// Event without ID or timestamp; the logger stamps both
fn unstamped_event(decision: AuditDecision, request: &RequestAttributes, reason: &str) -> AuditEvent {
    AuditEvent {
        event_id: String::new(),
        timestamp: None,
        ..AuditEvent::new(decision, request.route.clone(), request.resource.clone(), reason)
    }
}

/// Present, non-empty attribute value
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Parse claimed identity attributes, failing on the first malformed one
fn parse_claims(request: &RequestAttributes) -> Result<ClaimedIdentity, &'static str> {
    let mut claimed = ClaimedIdentity::default();

    if let Some(raw) = present(&request.device_id) {
        claimed.device_id = Some(parse_unsigned::<DeviceId>(raw).ok_or("invalid device ID")?);
    }

    if let Some(raw) = present(&request.clearance) {
        let clearance = Clearance::parse(raw).map_err(|_| "invalid clearance format")?;
        if !clearance.is_valid() {
            return Err("invalid clearance level");
        }
        claimed.clearance = Some(clearance);
    }

    if let Some(raw) = present(&request.layer) {
        claimed.layer = Some(raw.parse::<Layer>().map_err(|_| "invalid layer")?);
    }

    if let Some(raw) = present(&request.token_id) {
        claimed.token_id = Some(parse_unsigned::<TokenId>(raw).ok_or("invalid token ID")?);
    }

    Ok(claimed)
}

/// Unsigned decimal: ASCII digits only, no sign
fn parse_unsigned<T: std::str::FromStr>(raw: &str) -> Option<T> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
