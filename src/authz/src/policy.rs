//! Priority-based clearance policy
//!
//! A policy document is parsed from JSON, validated against the clearance
//! model and the device registry, checked for same-priority conflicts, and
//! then swapped in atomically. Evaluation is a read-only pass over the
//! active rule set where the highest-priority matching rule decides.

use crate::error::PolicyError;
use crate::model::{Clearance, DeviceId, Layer, TokenId, TokenOffset};
use crate::registry::DeviceRegistry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Route or method pattern matching everything
pub const WILDCARD: &str = "*";

/// Reason given when no rule matches
pub const DEFAULT_DENY_REASON: &str = "no matching policy rule";

/// Version of the empty policy active before the first load
pub const INITIAL_POLICY_VERSION: &str = "1.0";

/// Rule effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub const fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy file as written on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub rules: Vec<RuleDocument>,
}

/// One rule as written on disk, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// `allow` or `deny`
    #[serde(default)]
    pub effect: String,

    #[serde(default)]
    pub routes: Vec<String>,

    #[serde(default)]
    pub methods: Vec<String>,

    /// Raw clearance value; zero means no requirement
    #[serde(default)]
    pub required_clearance: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_layers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_devices: Vec<DeviceId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_devices: Vec<DeviceId>,

    /// Higher priority wins
    #[serde(default)]
    pub priority: i32,
}

/// Validated, immutable rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub effect: Effect,
    pub routes: Vec<String>,
    pub methods: Vec<String>,
    pub required_clearance: Clearance,
    pub allowed_layers: Vec<Layer>,
    pub allowed_devices: BTreeSet<DeviceId>,
    pub denied_devices: BTreeSet<DeviceId>,
    pub priority: i32,
}

impl Rule {
    /// Check whether this rule applies to the request context
    ///
    /// Route, method, clearance and layer must all match. A listed denied
    /// device then matches outright; otherwise a non-empty allow list must
    /// contain the device.
    pub fn matches(&self, ctx: &PolicyContext) -> bool {
        if !matches_route(&self.routes, &ctx.route) {
            return false;
        }

        if !matches_method(&self.methods, &ctx.method) {
            return false;
        }

        if !self.required_clearance.is_zero()
            && !ctx.clearance.is_higher_or_equal(self.required_clearance)
        {
            return false;
        }

        if !self.allowed_layers.is_empty()
            && !ctx.layer.is_some_and(|layer| self.allowed_layers.contains(&layer))
        {
            return false;
        }

        if ctx.device_id.is_some_and(|id| self.denied_devices.contains(&id)) {
            return true;
        }

        if !self.allowed_devices.is_empty()
            && !ctx.device_id.is_some_and(|id| self.allowed_devices.contains(&id))
        {
            return false;
        }

        true
    }

    /// First route/method pair on which two rules' scopes overlap
    fn overlap_with(&self, other: &Rule) -> Option<(String, String)> {
        let route = overlapping(&self.routes, &other.routes)?;
        let method = overlapping(&self.methods, &other.methods)?;
        Some((route, method))
    }
}

/// Validated policy: a version and its rules in document order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub version: String,
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Policy with no rules; every request is default-denied
    pub fn empty() -> Self {
        Self {
            version: INITIAL_POLICY_VERSION.to_string(),
            rules: Vec::new(),
        }
    }

    /// Highest-priority matching rule; ties go to the earliest rule
    pub fn winning_rule(&self, ctx: &PolicyContext) -> Option<&Rule> {
        let mut winner: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|rule| rule.matches(ctx)) {
            if winner.map_or(true, |best| rule.priority > best.priority) {
                winner = Some(rule);
            }
        }
        winner
    }
}

/// Two same-priority rules with opposite effects over an overlapping scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConflict {
    pub first: String,
    pub second: String,
    pub route: String,
    pub method: String,
    pub priority: i32,
}

impl fmt::Display for RuleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vs {}: conflicting effects on route {} method {} with same priority {}",
            self.first, self.second, self.route, self.method, self.priority
        )
    }
}

/// Request attributes a policy is evaluated against
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub route: String,
    pub method: String,
    pub device_id: Option<DeviceId>,
    pub layer: Option<Layer>,
    pub clearance: Clearance,
    pub request_id: Option<String>,
    pub source_ip: Option<String>,
    pub token: Option<(TokenId, TokenOffset)>,
}

impl PolicyContext {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn with_clearance(mut self, clearance: Clearance) -> Self {
        self.clearance = clearance;
        self
    }
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub effect: Effect,
    pub reason: String,

    /// Winning rule, `None` for the default deny
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
}

impl PolicyDecision {
    fn default_deny() -> Self {
        Self {
            effect: Effect::Deny,
            reason: DEFAULT_DENY_REASON.to_string(),
            rule_id: None,
            rule_name: None,
        }
    }

    fn from_rule(rule: &Rule) -> Self {
        let reason = match rule.effect {
            Effect::Allow => format!("allowed by rule '{}'", rule.name),
            Effect::Deny => format!("denied by rule '{}'", rule.name),
        };

        Self {
            effect: rule.effect,
            reason,
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.name.clone()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// Policy engine holding the active rule set
///
/// Loads validate fully before swapping the active policy, so evaluations
/// see either the old or the new rule set, never a mix.
pub struct PolicyEngine {
    active: RwLock<Arc<Policy>>,
    registry: Option<Arc<DeviceRegistry>>,
}

impl PolicyEngine {
    /// Create an engine with the empty policy and no registry checks
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(Policy::empty())),
            registry: None,
        }
    }

    /// Create an engine that rejects rules naming unregistered devices
    pub fn with_registry(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new()
        }
    }

    /// Validate a document and compile it into a policy without activating it
    pub fn validate(&self, document: &PolicyDocument) -> Result<Policy, PolicyError> {
        if document.version.is_empty() {
            return Err(PolicyError::MissingVersion);
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());

        for (index, raw) in document.rules.iter().enumerate() {
            let rule = self.compile_rule(index, raw)?;
            if !seen.insert(rule.id.clone()) {
                return Err(PolicyError::DuplicateRuleId(rule.id));
            }
            rules.push(rule);
        }

        let conflicts = detect_conflicts(&rules);
        if !conflicts.is_empty() {
            return Err(PolicyError::Conflicts(conflicts));
        }

        Ok(Policy {
            version: document.version.clone(),
            rules,
        })
    }

    fn compile_rule(&self, index: usize, raw: &RuleDocument) -> Result<Rule, PolicyError> {
        if raw.id.is_empty() {
            return Err(PolicyError::MissingRuleId { index });
        }

        let effect = match raw.effect.as_str() {
            "allow" => Effect::Allow,
            "deny" => Effect::Deny,
            other => {
                return Err(PolicyError::InvalidEffect {
                    rule: raw.id.clone(),
                    effect: other.to_string(),
                })
            }
        };

        let required_clearance = Clearance::new(raw.required_clearance);
        if !required_clearance.is_zero() && !required_clearance.is_valid() {
            return Err(PolicyError::InvalidClearance {
                rule: raw.id.clone(),
                value: raw.required_clearance,
            });
        }

        let allowed_layers = raw
            .allowed_layers
            .iter()
            .map(|tag| {
                tag.parse::<Layer>().map_err(|_| PolicyError::InvalidLayer {
                    rule: raw.id.clone(),
                    layer: tag.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(registry) = &self.registry {
            for &device in raw.allowed_devices.iter().chain(&raw.denied_devices) {
                if !registry.contains(device) {
                    return Err(PolicyError::UnknownDevice {
                        rule: raw.id.clone(),
                        device,
                    });
                }
            }
        }

        Ok(Rule {
            id: raw.id.clone(),
            name: raw.name.clone(),
            effect,
            routes: raw.routes.clone(),
            methods: raw.methods.clone(),
            required_clearance,
            allowed_layers,
            allowed_devices: raw.allowed_devices.iter().copied().collect(),
            denied_devices: raw.denied_devices.iter().copied().collect(),
            priority: raw.priority,
        })
    }

    /// Validate and atomically activate a policy document
    pub fn load(&self, document: &PolicyDocument) -> Result<(), PolicyError> {
        let policy = match self.validate(document) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(error = %e, "Policy validation failed; keeping active policy");
                return Err(e);
            }
        };

        let rule_count = policy.rules.len();
        let version = policy.version.clone();
        *self.active.write() = Arc::new(policy);

        info!(version = %version, rules = rule_count, "Policy loaded");
        Ok(())
    }

    /// Parse, validate and activate a policy from JSON bytes
    pub fn load_from_json(&self, data: &[u8]) -> Result<(), PolicyError> {
        let document: PolicyDocument = serde_json::from_slice(data)?;
        self.load(&document)
    }

    /// Read, validate and activate a policy file
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<(), PolicyError> {
        let data = std::fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), bytes = data.len(), "Read policy file");
        self.load_from_json(&data)
    }

    /// Decide a request; falls back to deny when nothing matches
    pub fn evaluate(&self, ctx: &PolicyContext) -> PolicyDecision {
        let policy = self.policy();

        let decision = match policy.winning_rule(ctx) {
            Some(rule) => PolicyDecision::from_rule(rule),
            None => PolicyDecision::default_deny(),
        };

        debug!(
            route = %ctx.route,
            method = %ctx.method,
            effect = %decision.effect,
            rule = decision.rule_id.as_deref().unwrap_or("-"),
            "Policy evaluated"
        );

        decision
    }

    /// Snapshot of the active policy
    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.active.read())
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Pairwise same-priority, opposite-effect overlap check
fn detect_conflicts(rules: &[Rule]) -> Vec<RuleConflict> {
    let mut conflicts = Vec::new();

    for (i, first) in rules.iter().enumerate() {
        for second in &rules[i + 1..] {
            if first.effect == second.effect || first.priority != second.priority {
                continue;
            }
            if let Some((route, method)) = first.overlap_with(second) {
                conflicts.push(RuleConflict {
                    first: first.id.clone(),
                    second: second.id.clone(),
                    route,
                    method,
                    priority: first.priority,
                });
            }
        }
    }

    conflicts
}

/// First overlapping pattern between two lists; an empty list covers everything
fn overlapping(left: &[String], right: &[String]) -> Option<String> {
    let wildcard = [WILDCARD.to_string()];
    let left = if left.is_empty() { &wildcard[..] } else { left };
    let right = if right.is_empty() { &wildcard[..] } else { right };

    for a in left {
        for b in right {
            if a == b || b == WILDCARD {
                return Some(a.clone());
            }
            if a == WILDCARD {
                return Some(b.clone());
            }
        }
    }
    None
}

fn matches_route(patterns: &[String], route: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }

    patterns.iter().any(|pattern| {
        pattern == WILDCARD
            || pattern == route
            || pattern
                .strip_suffix('*')
                .is_some_and(|prefix| route.starts_with(prefix))
    })
}

fn matches_method(methods: &[String], method: &str) -> bool {
    methods.is_empty() || methods.iter().any(|m| m == WILDCARD || m == method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceClass, Device};
    use serde_json::json;

    fn engine_with(policy: serde_json::Value) -> PolicyEngine {
        let engine = PolicyEngine::new();
        engine.load_from_json(policy.to_string().as_bytes()).unwrap();
        engine
    }

    fn public_policy() -> serde_json::Value {
        json!({
            "version": "1.0",
            "rules": [
                {"id": "public", "name": "Public read", "effect": "allow",
                 "routes": ["/public"], "methods": ["GET"], "priority": 100},
                {"id": "default-deny", "name": "Default deny", "effect": "deny",
                 "routes": ["*"], "methods": ["*"], "priority": 0}
            ]
        })
    }

    #[test]
    fn test_initial_policy_denies() {
        let engine = PolicyEngine::new();
        let decision = engine.evaluate(&PolicyContext::new("GET", "/anything"));

        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.reason, DEFAULT_DENY_REASON);
        assert!(decision.rule_id.is_none());
        assert_eq!(engine.policy().version, INITIAL_POLICY_VERSION);
    }

    #[test]
    fn test_public_route_decisions() {
        let engine = engine_with(public_policy());

        let allow = engine.evaluate(&PolicyContext::new("GET", "/public"));
        assert!(allow.is_allowed());
        assert_eq!(allow.rule_id.as_deref(), Some("public"));
        assert_eq!(allow.reason, "allowed by rule 'Public read'");

        let post = engine.evaluate(&PolicyContext::new("POST", "/public"));
        assert_eq!(post.effect, Effect::Deny);
        assert_eq!(post.rule_id.as_deref(), Some("default-deny"));
        assert_eq!(post.reason, "denied by rule 'Default deny'");

        let unknown = engine.evaluate(&PolicyContext::new("GET", "/unknown"));
        assert_eq!(unknown.effect, Effect::Deny);
    }

    #[test]
    fn test_clearance_requirement() {
        let engine = engine_with(json!({
            "version": "1.0",
            "rules": [
                {"id": "protected", "name": "Protected", "effect": "allow",
                 "routes": ["/protected"], "methods": ["GET"],
                 "required_clearance": Clearance::LEVEL_5.raw(), "priority": 50},
                {"id": "default-deny", "name": "Default deny", "effect": "deny",
                 "routes": ["*"], "methods": ["*"], "priority": 0}
            ]
        }));

        let high = PolicyContext::new("GET", "/protected").with_clearance(Clearance::LEVEL_7);
        assert!(engine.evaluate(&high).is_allowed());

        let low = PolicyContext::new("GET", "/protected").with_clearance(Clearance::LEVEL_3);
        assert!(!engine.evaluate(&low).is_allowed());

        let none = PolicyContext::new("GET", "/protected");
        assert!(!engine.evaluate(&none).is_allowed());
    }

    #[test]
    fn test_prefix_route_and_layers() {
        let engine = engine_with(json!({
            "version": "1.0",
            "rules": [
                {"id": "ctl", "name": "Control plane", "effect": "allow",
                 "routes": ["/api/control/*"], "methods": ["GET", "PUT"],
                 "allowed_layers": ["control", "application"], "priority": 10}
            ]
        }));

        let ctx = PolicyContext::new("PUT", "/api/control/valves/3").with_layer(Layer::Control);
        assert!(engine.evaluate(&ctx).is_allowed());

        let wrong_layer = PolicyContext::new("PUT", "/api/control/valves/3").with_layer(Layer::Data);
        assert!(!engine.evaluate(&wrong_layer).is_allowed());

        let no_layer = PolicyContext::new("GET", "/api/control/valves");
        assert!(!engine.evaluate(&no_layer).is_allowed());

        let outside = PolicyContext::new("GET", "/api/data").with_layer(Layer::Control);
        assert!(!engine.evaluate(&outside).is_allowed());
    }

    #[test]
    fn test_device_lists() {
        let engine = engine_with(json!({
            "version": "1.0",
            "rules": [
                {"id": "fleet", "name": "Fleet", "effect": "allow",
                 "routes": ["/fleet"], "methods": ["GET"],
                 "allowed_devices": [1, 2], "priority": 10},
                {"id": "quarantine", "name": "Quarantine", "effect": "deny",
                 "routes": ["/fleet"], "methods": ["GET"],
                 "allowed_devices": [1], "denied_devices": [2], "priority": 20}
            ]
        }));

        let member = engine.evaluate(&PolicyContext::new("GET", "/fleet").with_device(1));
        assert_eq!(member.rule_id.as_deref(), Some("quarantine"));
        assert!(!member.is_allowed());

        // Device 2 is on the deny list, which matches before the allow list is checked
        let quarantined = engine.evaluate(&PolicyContext::new("GET", "/fleet").with_device(2));
        assert_eq!(quarantined.rule_id.as_deref(), Some("quarantine"));
        assert_eq!(quarantined.effect, Effect::Deny);

        let stranger = engine.evaluate(&PolicyContext::new("GET", "/fleet").with_device(3));
        assert_eq!(stranger.reason, DEFAULT_DENY_REASON);

        let anonymous = engine.evaluate(&PolicyContext::new("GET", "/fleet"));
        assert_eq!(anonymous.reason, DEFAULT_DENY_REASON);
    }

    #[test]
    fn test_priority_tie_goes_to_first_rule() {
        let engine = engine_with(json!({
            "version": "1.0",
            "rules": [
                {"id": "first", "name": "First", "effect": "allow",
                 "routes": ["/a*"], "methods": ["GET"], "priority": 5},
                {"id": "second", "name": "Second", "effect": "allow",
                 "routes": ["/ab"], "methods": ["GET"], "priority": 5}
            ]
        }));

        let decision = engine.evaluate(&PolicyContext::new("GET", "/ab"));
        assert_eq!(decision.rule_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_negative_priority_can_win() {
        let engine = engine_with(json!({
            "version": "1.0",
            "rules": [
                {"id": "low", "name": "Low", "effect": "allow",
                 "routes": ["/x"], "methods": ["GET"], "priority": -10}
            ]
        }));

        assert!(engine.evaluate(&PolicyContext::new("GET", "/x")).is_allowed());
    }

    #[test]
    fn test_validation_errors() {
        let engine = PolicyEngine::new();

        let cases = vec![
            (json!({"rules": []}), "version"),
            (json!({"version": "1", "rules": [{"effect": "allow"}]}), "ID is required"),
            (json!({"version": "1", "rules": [{"id": "r", "effect": "maybe"}]}), "invalid effect"),
            (
                json!({"version": "1", "rules": [
                    {"id": "r", "effect": "allow"}, {"id": "r", "effect": "deny", "priority": 1}
                ]}),
                "duplicate",
            ),
            (
                json!({"version": "1", "rules": [{"id": "r", "effect": "allow", "required_clearance": 0x0101_0101u32}]}),
                "invalid clearance",
            ),
            (
                json!({"version": "1", "rules": [{"id": "r", "effect": "allow", "allowed_layers": ["physical"]}]}),
                "invalid layer",
            ),
        ];

        for (document, expected) in cases {
            let document: PolicyDocument = serde_json::from_value(document).unwrap();
            let err = engine.validate(&document).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected '{}' in '{}'",
                expected,
                err
            );
        }
    }

    #[test]
    fn test_conflict_detection() {
        let engine = PolicyEngine::new();
        let conflicting = json!({
            "version": "1.0",
            "rules": [
                {"id": "open", "name": "Open", "effect": "allow",
                 "routes": ["/data"], "methods": ["GET"], "priority": 10},
                {"id": "closed", "name": "Closed", "effect": "deny",
                 "routes": ["/data"], "methods": ["GET"], "priority": 10}
            ]
        });

        let err = engine.load_from_json(conflicting.to_string().as_bytes()).unwrap_err();
        match err {
            PolicyError::Conflicts(conflicts) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].first, "open");
                assert_eq!(conflicts[0].second, "closed");
                assert_eq!(conflicts[0].route, "/data");
            }
            other => panic!("expected conflicts, got {other}"),
        }

        let mut resolved = conflicting.clone();
        resolved["rules"][1]["priority"] = json!(11);
        engine.load_from_json(resolved.to_string().as_bytes()).unwrap();
        assert_eq!(engine.policy().rules.len(), 2);
    }

    #[test]
    fn test_wildcard_conflicts_listed() {
        let engine = PolicyEngine::new();
        let document: PolicyDocument = serde_json::from_value(json!({
            "version": "1.0",
            "rules": [
                {"id": "a", "effect": "allow", "routes": ["/x"], "methods": ["GET"], "priority": 1},
                {"id": "b", "effect": "deny", "routes": ["*"], "methods": ["*"], "priority": 1},
                {"id": "c", "effect": "allow", "routes": ["/y"], "methods": ["*"], "priority": 1},
                {"id": "d", "effect": "deny", "routes": ["/z"], "methods": ["POST"], "priority": 1}
            ]
        }))
        .unwrap();

        let err = engine.validate(&document).unwrap_err();
        let PolicyError::Conflicts(conflicts) = err else {
            panic!("expected conflicts");
        };
        let pairs: Vec<_> = conflicts
            .iter()
            .map(|c| (c.first.as_str(), c.second.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("b", "c")]);
    }

    #[test]
    fn test_empty_lists_conflict_like_wildcards() {
        let engine = PolicyEngine::new();
        let document: PolicyDocument = serde_json::from_value(json!({
            "version": "1.0",
            "rules": [
                {"id": "any-route", "effect": "deny", "routes": [], "methods": ["GET"], "priority": 3},
                {"id": "reports", "effect": "allow", "routes": ["/reports"], "methods": ["GET"], "priority": 3},
                {"id": "any-method", "effect": "allow", "routes": ["/audit"], "methods": [], "priority": 7},
                {"id": "audit-write", "effect": "deny", "routes": ["/audit"], "methods": ["POST"], "priority": 7}
            ]
        }))
        .unwrap();

        let PolicyError::Conflicts(conflicts) = engine.validate(&document).unwrap_err() else {
            panic!("expected conflicts");
        };
        assert_eq!(conflicts.len(), 2);

        assert_eq!(conflicts[0].first, "any-route");
        assert_eq!(conflicts[0].second, "reports");
        assert_eq!(conflicts[0].route, "/reports");
        assert_eq!(conflicts[0].method, "GET");

        assert_eq!(conflicts[1].first, "any-method");
        assert_eq!(conflicts[1].second, "audit-write");
        assert_eq!(conflicts[1].method, "POST");
    }

    #[test]
    fn test_failed_load_keeps_active_policy() {
        let engine = engine_with(public_policy());

        let result = engine.load_from_json(br#"{"version": "", "rules": []}"#);
        assert!(matches!(result, Err(PolicyError::MissingVersion)));

        let malformed = engine.load_from_json(b"{not json");
        assert!(matches!(malformed, Err(PolicyError::Parse(_))));

        assert_eq!(engine.policy().rules.len(), 2);
        assert!(engine.evaluate(&PolicyContext::new("GET", "/public")).is_allowed());
    }

    #[test]
    fn test_registry_device_references() {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register(Device::new(5, Layer::Control, DeviceClass::Controller, Clearance::LEVEL_6, "plc"))
            .unwrap();
        let engine = PolicyEngine::with_registry(Arc::clone(&registry));

        let known = json!({"version": "1", "rules": [
            {"id": "r", "effect": "allow", "allowed_devices": [5]}
        ]});
        engine.load_from_json(known.to_string().as_bytes()).unwrap();

        let unknown = json!({"version": "1", "rules": [
            {"id": "r", "effect": "deny", "denied_devices": [6]}
        ]});
        let err = engine.load_from_json(unknown.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownDevice { device: 6, .. }));
    }

    #[test]
    fn test_route_and_method_matching() {
        let routes = vec!["/api/*".to_string(), "/health".to_string()];
        assert!(matches_route(&routes, "/api/devices"));
        assert!(matches_route(&routes, "/health"));
        assert!(!matches_route(&routes, "/healthz"));
        assert!(matches_route(&[], "/anything"));

        assert!(matches_method(&["*".to_string()], "DELETE"));
        assert!(!matches_method(&["GET".to_string()], "get"));
        assert!(matches_method(&[], "PATCH"));
    }
}
