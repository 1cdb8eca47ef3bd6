// SPDX-License-Identifier: Apache-2.0

//! The Driver interface (§4.5): the contract every logic/CEL engine
//! implements to compile templates, hold per-constraint parameters and
//! referential data, and evaluate a batch of constraints against a review.

use serde_json::Value;
use warden_core::error::Error;
use warden_core::model::{Constraint, ConstraintKey, ConstraintTemplate, RawViolation, Review, TargetName};
use warden_core::path::StoragePath;

/// Per-query evaluation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// When true, the driver's [`Driver::dump`]-style trace is captured and
    /// returned alongside the results.
    pub trace: bool,
}

/// The outcome of a [`Driver::query`] call.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Raw findings, not yet attached to their constraint or resolved
    /// against requested enforcement points.
    pub results: Vec<RawViolation>,
    /// A human-readable evaluation trace, present only when requested and
    /// supported.
    pub trace: Option<String>,
}

/// A policy engine capable of compiling constraint templates and evaluating
/// constraints against a review (§4.5).
///
/// Implementations must be safe for concurrent [`Driver::query`] calls
/// running alongside concurrent `add_*`/`remove_*` calls: a query started
/// before a concurrent [`Driver::remove_template`] must either complete
/// against the pre-removal state or observe consistent absence, never a
/// half-removed template.
pub trait Driver: Send + Sync {
    /// The engine identifier matched against [`warden_core::model::CodeEntry::engine`].
    fn name(&self) -> &str;

    /// Compiles and installs `template`. Templates binding more than one
    /// target are rejected (unsupported in this release).
    fn add_template(&self, target: &TargetName, template: &ConstraintTemplate) -> Result<(), Error>;

    /// Idempotently removes a template's compiled state and its constraints'
    /// parameters.
    fn remove_template(&self, target: &TargetName, kind: &str) -> Result<(), Error>;

    /// Installs or replaces a constraint's parameters under
    /// `/constraints/<kind>/<name>`. Absent parameters default to `{}`.
    fn add_constraint(&self, target: &TargetName, constraint: &Constraint) -> Result<(), Error>;

    /// Idempotently removes a constraint's parameters.
    fn remove_constraint(&self, target: &TargetName, key: &ConstraintKey) -> Result<(), Error>;

    /// Writes `value` into the referential data channel at `path`, creating
    /// ancestor nodes as needed.
    fn add_data(&self, path: &StoragePath, value: Value) -> Result<(), Error>;

    /// Idempotently removes the referential data at `path`.
    fn remove_data(&self, path: &StoragePath) -> Result<(), Error>;

    /// Evaluates `constraints` against `review` for `target`.
    fn query(
        &self,
        target: &TargetName,
        constraints: &[Constraint],
        review: &Review,
        opts: QueryOptions,
    ) -> Result<QueryOutcome, Error>;

    /// A diagnostic snapshot of the driver's compiled and data state.
    fn dump(&self) -> Result<String, Error>;
}

/// One resolved (or failed) external-data key lookup (§4.7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExternalDataItem {
    /// The key that was requested.
    pub key: Value,
    /// The resolved value, if the lookup succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// The per-key error, if the lookup failed for this key alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The outcome of an external-data batch lookup against a single provider.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExternalDataOutcome {
    /// Per-key results, in the same order as the request's keys.
    pub items: Vec<ExternalDataItem>,
    /// A whole-request failure (the provider was unreachable, returned a
    /// malformed response, etc.), distinct from a per-key `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_error: Option<String>,
}

/// A handle drivers use to perform external-data lookups (§4.5 step 5,
/// §4.7) without depending on the HTTP/TLS machinery directly. Implemented
/// by the external-data subsystem's client cache.
pub trait ExternalDataResolver: Send + Sync {
    /// Looks up `keys` against `provider`, deterministically within a single
    /// call (the driver is responsible for memoizing repeat calls within
    /// one query).
    fn lookup(&self, provider: &str, keys: &[Value]) -> ExternalDataOutcome;
}
