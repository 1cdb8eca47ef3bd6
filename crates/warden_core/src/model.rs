// SPDX-License-Identifier: Apache-2.0

//! Core data model (§3): templates, constraints, reviews, results, and the
//! handful of free-form identifiers (engine, enforcement point/action names)
//! that the framework treats as opaque strings.

use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A case-sensitive engine identifier matched against [`CodeEntry::engine`].
/// Reference values in this release: `Rego`, `K8sNativeValidation`.
pub type EngineId = String;

/// A case-sensitive target name, e.g. `admission.k8s.gatekeeper.sh`.
pub type TargetName = String;

/// A case-sensitive enforcement-point name. The wildcard is `*`, also
/// recognized by the literal name `all`.
pub type EnforcementPoint = String;

/// A free-form, case-sensitive enforcement action (`deny`, `warn`, `dryrun`,
/// ...). The framework assigns it no behavior of its own.
pub type EnforcementAction = String;

/// The sentinel enforcement-point name meaning "every requested point".
pub const ALL_POINTS_WILDCARD: &str = "*";
/// An alias for [`ALL_POINTS_WILDCARD`] accepted in scoped entries.
pub const ALL_POINTS_ALIAS: &str = "all";

/// Returns true if `point` is the wildcard sentinel or its `all` alias.
#[must_use]
pub fn is_wildcard_point(point: &str) -> bool {
    point == ALL_POINTS_WILDCARD || point == ALL_POINTS_ALIAS
}

/// One engine's compiled source for a single [`Target`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeEntry {
    /// The engine this source is interpreted by.
    pub engine: EngineId,
    /// Opaque, engine-specific source payload.
    pub source: Value,
    /// Per-engine override of "an external policy-admission mechanism is
    /// expected to enforce this template" (§9 open question (a)).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_external_enforcement: Option<bool>,
}

/// One target binding within a [`ConstraintTemplate`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Target {
    /// The target this binding applies to.
    pub target: TargetName,
    /// The engine sources for this target.
    #[serde(default)]
    pub code: Vec<CodeEntry>,
    /// Admission operations this target should fire on, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
}

/// A canonical ConstraintTemplate: the single internal representation every
/// versioned source shape is normalized into (§4.3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConstraintTemplate {
    /// The Kind under which constraints of this template are identified.
    pub kind: String,
    /// The OpenAPI-style schema for the `parameters` block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// When true, `schema` has already been made permissive via recursive
    /// `x-preserve-unknown-fields` injection (§4.3 rule 2).
    #[serde(default)]
    pub legacy_schema: bool,
    /// One or more target bindings.
    pub targets: Vec<Target>,
}

impl ConstraintTemplate {
    /// Every engine identifier referenced by this template's targets, across
    /// all targets, in declaration order, de-duplicated.
    #[must_use]
    pub fn engines(&self) -> Vec<EngineId> {
        let mut seen = Vec::new();
        for target in &self.targets {
            for code in &target.code {
                if !seen.contains(&code.engine) {
                    seen.push(code.engine.clone());
                }
            }
        }
        seen
    }

    /// The [`CodeEntry`] for `engine` within `target`, if any.
    #[must_use]
    pub fn code_for(&self, target: &str, engine: &str) -> Option<&CodeEntry> {
        self.targets
            .iter()
            .find(|t| t.target == target)
            .and_then(|t| t.code.iter().find(|c| c.engine == engine))
    }
}

/// The enforcement-action model a [`Constraint`] carries (§3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum EnforcementActionModel {
    /// A single action applied unconditionally.
    Single(EnforcementAction),
    /// A list of `(action, points)` pairs, each scoping the action to a
    /// subset of enforcement points (or all of them, via the wildcard).
    Scoped(Vec<ScopedEnforcementAction>),
}

/// One entry of a [`EnforcementActionModel::Scoped`] list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScopedEnforcementAction {
    /// The action to apply at the listed points.
    pub action: EnforcementAction,
    /// The enforcement points this action applies to. An entry listing zero
    /// points is ignored during resolution.
    pub enforcement_points: Vec<EnforcementPoint>,
}

/// The `(Kind, Name)` pair that identifies a constraint within a client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ConstraintKey {
    /// The constraint's Kind (matches a template's Kind).
    pub kind: String,
    /// The constraint's Name, unique within its Kind.
    pub name: String,
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The `match` block of a constraint: namespace/label selectors plus
/// target-specific match fields the Target Handler alone interprets.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct MatchCriteria {
    /// Namespace names this constraint applies to, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
    /// Namespace names this constraint explicitly excludes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_namespaces: Option<Vec<String>>,
    /// A label selector, as a flat key/value map (conjunction of equality
    /// matches — sufficient for the reference target handler in §4.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<BTreeMap<String, String>>,
    /// Target-specific fields the core does not interpret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// A Constraint: an instance of a [`ConstraintTemplate`] supplying parameters
/// and match criteria.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Constraint {
    /// The constraint's `(Kind, Name)` key.
    pub key: ConstraintKey,
    /// The parameters block, passed to the driver verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Namespace/label/target-specific match criteria.
    #[serde(default)]
    pub r#match: MatchCriteria,
    /// Labels, significant for [`Constraint::semantically_equals`].
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations; ignored by semantic equality.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// The enforcement-action model.
    pub enforcement_action: EnforcementActionModel,
}

impl Constraint {
    /// Semantic equality per §3: `spec` (parameters + match + enforcement
    /// action) and labels must be deep-equal; annotations and all other
    /// metadata are ignored. Empty and absent maps compare equal.
    #[must_use]
    pub fn semantically_equals(&self, other: &Constraint) -> bool {
        self.key == other.key
            && self.parameters == other.parameters
            && self.r#match == other.r#match
            && self.enforcement_action == other.enforcement_action
            && normalize_labels(&self.labels) == normalize_labels(&other.labels)
    }
}

fn normalize_labels(labels: &BTreeMap<String, String>) -> &BTreeMap<String, String> {
    labels
}

/// An opaque, handler-typed review value. The core never interprets its
/// internal structure; only the Target Handler that produced it (via
/// [`crate::target::TargetHandler::handle_review`]) ever downcasts it.
/// Drivers, which are handler-agnostic, instead consume [`Review::as_json`].
#[derive(Clone)]
pub struct Review {
    typed: Arc<dyn Any + Send + Sync>,
    json: Value,
}

impl Review {
    /// Wraps a handler-specific review value, capturing its JSON projection
    /// for handler-agnostic consumers (drivers).
    pub fn new<T: Any + Send + Sync + serde::Serialize>(value: T) -> Self {
        let json = serde_json::to_value(&value).unwrap_or(Value::Null);
        Review { typed: Arc::new(value), json }
    }

    /// Downcasts to the concrete review type a handler expects.
    #[must_use]
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.typed.downcast_ref::<T>()
    }

    /// The review's JSON projection, as bound into a driver's evaluation
    /// input (§4.5, §4.6).
    #[must_use]
    pub fn as_json(&self) -> &Value {
        &self.json
    }
}

impl fmt::Debug for Review {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Review(..)")
    }
}

/// A single finding returned by a driver, before enforcement-action
/// resolution and constraint attachment (§4.5 Query).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawViolation {
    /// The constraint this violation came from.
    pub constraint: ConstraintKey,
    /// Human-readable message.
    pub msg: String,
    /// Structured detail, defaulting to an empty object.
    #[serde(default)]
    pub details: Value,
}

/// A Result: a fired constraint, normalized with its target and resolved
/// enforcement actions (§3).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationResult {
    /// The target that produced this result.
    pub target: TargetName,
    /// Human-readable message.
    pub msg: String,
    /// Structured detail, if any.
    pub details: Value,
    /// A deep copy of the originating constraint.
    pub constraint: Constraint,
    /// The enforcement actions to apply, already deduplicated and sorted.
    pub enforcement_actions: Vec<EnforcementAction>,
}

/// An external-data provider (§3, §4.7).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Provider {
    /// Unique provider name.
    pub name: String,
    /// HTTPS (or HTTP, if `insecure_tls_skip_verify`) base URL.
    pub url: String,
    /// Request timeout, in seconds. Must be `>= 0`.
    pub timeout_seconds: u32,
    /// Base64-encoded PEM CA bundle.
    #[serde(default)]
    pub ca_bundle: String,
    /// Mutually exclusive with a non-empty `ca_bundle`.
    #[serde(default)]
    pub insecure_tls_skip_verify: bool,
}
