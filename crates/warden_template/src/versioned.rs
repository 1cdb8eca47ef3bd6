// SPDX-License-Identifier: Apache-2.0

//! The versioned source shapes the canonicalizer accepts (§4.3).

use serde_json::Value;
use warden_core::model::CodeEntry;

/// One target binding as it appears in a versioned source shape, prior to
/// fusing the legacy `rego` field into its Code list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VersionedTarget {
    /// The target this binding applies to.
    pub target: String,
    /// Already-structured Code entries, if any.
    #[serde(default)]
    pub code: Vec<CodeEntry>,
    /// A legacy single-engine Rego source, fused into `code` on canonicalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rego: Option<String>,
    /// Library sources accompanying `rego`.
    #[serde(default)]
    pub libs: Vec<String>,
    /// Admission operations this target should fire on, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
}

/// A template source in one of the shapes this release accepts.
///
/// `V1Alpha1` predates the `legacySchema` flag and is always treated as
/// legacy (schema permissiveness is always defaulted). `V1Beta1` carries the
/// flag, defaulting to `false` when absent. `V1` is the current shape,
/// equivalent in meaning to the canonical form plus the legacy `rego` fusion
/// step.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "apiVersion", rename_all = "lowercase")]
pub enum VersionedTemplate {
    /// The oldest accepted shape; no `legacySchema` field exists.
    V1Alpha1 {
        /// The Kind under which constraints are identified.
        kind: String,
        /// The `parameters` schema, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        /// Target bindings.
        targets: Vec<VersionedTarget>,
    },
    /// The shape that introduced the explicit legacy-schema flag.
    V1Beta1 {
        /// The Kind under which constraints are identified.
        kind: String,
        /// The `parameters` schema, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        /// Defaults to `false` when absent.
        #[serde(default)]
        legacy_schema: Option<bool>,
        /// Target bindings.
        targets: Vec<VersionedTarget>,
    },
    /// The current shape.
    V1 {
        /// The Kind under which constraints are identified.
        kind: String,
        /// The `parameters` schema, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        /// Defaults to `false` when absent.
        #[serde(default)]
        legacy_schema: bool,
        /// Target bindings.
        targets: Vec<VersionedTarget>,
    },
}
