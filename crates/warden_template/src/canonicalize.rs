// SPDX-License-Identifier: Apache-2.0

//! Multi-version → canonical template conversion (§4.3).

use crate::schema::default_schema_permissiveness;
use crate::versioned::{VersionedTarget, VersionedTemplate};
use warden_common::result::WResult;
use warden_core::error::Error;
use warden_core::model::{CodeEntry, ConstraintTemplate, Target};

const ROGO_ENGINE: &str = "Rego";

/// Canonicalizes a versioned template source into the single internal
/// representation every driver and the client operate on.
///
/// Non-fatal warnings (ambiguous schema nodes defaulted to object) are
/// returned alongside the value; callers that only care about the value can
/// call [`WResult::into_result`] or [`WResult::into_result_with_nfes`].
pub fn canonicalize(source: VersionedTemplate) -> WResult<ConstraintTemplate, Error> {
    let (kind, schema, legacy_schema, targets) = match source {
        VersionedTemplate::V1Alpha1 { kind, schema, targets } => (kind, schema, true, targets),
        VersionedTemplate::V1Beta1 { kind, schema, legacy_schema, targets } => {
            (kind, schema, legacy_schema.unwrap_or(false), targets)
        }
        VersionedTemplate::V1 { kind, schema, legacy_schema, targets } => {
            (kind, schema, legacy_schema, targets)
        }
    };

    if kind.is_empty() {
        return WResult::with_fatal_error(Error::InvalidConstraintTemplate {
            kind: kind.clone(),
            reason: "kind must not be empty".to_owned(),
        });
    }

    let mut canonical_targets = Vec::with_capacity(targets.len());
    for target in targets {
        match fuse_target(&kind, target) {
            Ok(target) => canonical_targets.push(target),
            Err(err) => return WResult::with_fatal_error(err),
        }
    }

    if !canonical_targets.iter().any(|t: &Target| !t.code.is_empty()) {
        return WResult::with_fatal_error(Error::InvalidConstraintTemplate {
            kind: kind.clone(),
            reason: "no target declares a registered engine".to_owned(),
        });
    }

    let mut warnings = Vec::new();
    let mut schema = schema;
    if legacy_schema {
        if let Some(schema) = schema.as_mut() {
            default_schema_permissiveness(schema, &mut warnings);
        }
    }

    WResult::with_non_fatal_errors(
        ConstraintTemplate { kind, schema, legacy_schema, targets: canonical_targets },
        warnings,
    )
}

fn fuse_target(kind: &str, target: VersionedTarget) -> Result<Target, Error> {
    let VersionedTarget { target: name, mut code, rego, libs, operations } = target;

    if let Some(rego_source) = rego.filter(|r| !r.is_empty()) {
        let fused = CodeEntry {
            engine: ROGO_ENGINE.to_owned(),
            source: serde_json::json!({"rego": rego_source, "libs": libs, "version": "v1"}),
            generate_external_enforcement: None,
        };
        code.retain(|entry| entry.engine != ROGO_ENGINE);
        code.push(fused);
    }

    let mut seen = std::collections::BTreeSet::new();
    for entry in &code {
        if !seen.insert(entry.engine.clone()) {
            return Err(Error::InvalidConstraintTemplate {
                kind: kind.to_owned(),
                reason: format!("target '{name}' declares engine '{}' more than once", entry.engine),
            });
        }
    }

    Ok(Target { target: name, code, operations })
}

/// Converts a canonical template back into a versioned shape (`V1`,
/// carrying through whether the schema has already been made permissive).
/// Used to verify the round-trip invariant: re-canonicalizing this output
/// must reproduce the input unchanged (§4.3 rules 3-4).
#[must_use]
pub fn to_versioned(template: &ConstraintTemplate) -> VersionedTemplate {
    VersionedTemplate::V1 {
        kind: template.kind.clone(),
        schema: template.schema.clone(),
        legacy_schema: template.legacy_schema,
        targets: template
            .targets
            .iter()
            .map(|t| VersionedTarget {
                target: t.target.clone(),
                code: t.code.clone(),
                rego: None,
                libs: Vec::new(),
                operations: t.operations.clone(),
            })
            .collect(),
    }
}
