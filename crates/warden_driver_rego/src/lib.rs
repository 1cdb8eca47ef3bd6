// SPDX-License-Identifier: Apache-2.0

//! The Logic driver (§4.5): compiles templates into `regorus` engines,
//! namespaces their library packages, and evaluates constraint batches.

mod rewrite;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rewrite::{rewrite, Library};
use serde_json::Value;
use std::sync::Arc;
use warden_core::error::Error;
use warden_core::model::{Constraint, ConstraintKey, ConstraintTemplate, RawViolation, Review, TargetName};
use warden_core::path::StoragePath;
use warden_core::store::Store;
use warden_driver::{Driver, ExternalDataResolver, QueryOptions, QueryOutcome};

const VIOLATION_RULE: &str = "violation";

// Anchored to a rule-head position (start of line, optional leading
// whitespace, `violation` followed by `[`, `(`, or an assignment/definition
// operator) so a comment or string literal merely mentioning the word does
// not satisfy the required-rule check (§4.5 step 2).
static VIOLATION_RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*violation(\[|\(|\s*:?=|\s*\{)").unwrap());

fn required_rule_present(entry: &str) -> bool {
    VIOLATION_RULE_RE.is_match(entry)
}

#[derive(Clone, Hash, Eq, PartialEq)]
struct TemplateKey {
    target: TargetName,
    kind: String,
}

struct CompiledTemplate {
    engine: regorus::Engine,
    generate_external_enforcement: Option<bool>,
}

/// The Rego logic driver.
pub struct RegoDriver {
    templates: DashMap<TemplateKey, Arc<CompiledTemplate>>,
    data: Store,
    allowed_externs: Vec<String>,
    external_data: Mutex<Option<Arc<dyn ExternalDataResolver>>>,
}

impl RegoDriver {
    /// Creates an empty driver. `allowed_externs` lists the top-level
    /// `data.*` paths (without the `data.` prefix) templates may reference
    /// directly, e.g. `["inventory"]`.
    #[must_use]
    pub fn new(allowed_externs: Vec<String>) -> Self {
        Self {
            templates: DashMap::new(),
            data: Store::default(),
            allowed_externs,
            external_data: Mutex::new(None),
        }
    }

    /// Wires an external-data resolver used by the `external_data.lookup`
    /// builtin at query time (§4.5 step 5).
    pub fn set_external_data_resolver(&self, resolver: Arc<dyn ExternalDataResolver>) {
        *self.external_data.lock() = Some(resolver);
    }

    fn key(target: &TargetName, kind: &str) -> TemplateKey {
        TemplateKey { target: target.clone(), kind: kind.to_owned() }
    }
}

impl Default for RegoDriver {
    fn default() -> Self {
        Self::new(vec!["inventory".to_owned()])
    }
}

impl Driver for RegoDriver {
    fn name(&self) -> &str {
        "Rego"
    }

    fn add_template(&self, target: &TargetName, template: &ConstraintTemplate) -> Result<(), Error> {
        if template.targets.len() > 1 {
            return Err(Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: "templates binding more than one target are unsupported".to_owned(),
            });
        }
        let binding = template.targets.first().ok_or_else(|| Error::InvalidConstraintTemplate {
            kind: template.kind.clone(),
            reason: "template declares no target".to_owned(),
        })?;
        let code = binding
            .code
            .iter()
            .find(|c| c.engine == self.name())
            .ok_or_else(|| Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: "template declares no Rego code entry".to_owned(),
            })?;

        let entry_source = code
            .source
            .get("rego")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: "Rego code entry is missing its 'rego' source text".to_owned(),
            })?;
        if !required_rule_present(entry_source) {
            return Err(Error::InvalidModule {
                kind: template.kind.clone(),
                reason: format!("entry module does not define the '{VIOLATION_RULE}' rule"),
            });
        }
        let libs: Vec<Library> = code
            .source
            .get("libs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|s| Library { source: s.to_owned() })
            .collect();

        let prefix = format!("t_{}", template.kind.to_lowercase());
        let rewritten = rewrite(&template.kind, entry_source, &libs, &prefix, &self.allowed_externs)?;

        let mut engine = regorus::Engine::new();
        engine
            .add_policy(format!("{}/entry.rego", template.kind), rewritten.entry)
            .map_err(|e| Error::Compile { source_ref: template.kind.clone(), reason: e.to_string() })?;
        for (i, lib_source) in rewritten.libs.into_iter().enumerate() {
            engine
                .add_policy(format!("{}/lib_{i}.rego", template.kind), lib_source)
                .map_err(|e| Error::Compile { source_ref: template.kind.clone(), reason: e.to_string() })?;
        }

        let compiled = CompiledTemplate { engine, generate_external_enforcement: code.generate_external_enforcement };
        let _ = self.templates.insert(Self::key(target, &template.kind), Arc::new(compiled));
        Ok(())
    }

    fn remove_template(&self, target: &TargetName, kind: &str) -> Result<(), Error> {
        let _ = self.templates.remove(&Self::key(target, kind));
        self.data.remove_prefix(&StoragePath::from_segments(["constraints", kind]));
        Ok(())
    }

    fn add_constraint(&self, _target: &TargetName, constraint: &Constraint) -> Result<(), Error> {
        let params = constraint.parameters.clone().unwrap_or_else(|| Value::Object(Default::default()));
        self.data.write(&StoragePath::constraint_params(&constraint.key.kind, &constraint.key.name), params)
    }

    fn remove_constraint(&self, _target: &TargetName, key: &ConstraintKey) -> Result<(), Error> {
        self.data.remove(&StoragePath::constraint_params(&key.kind, &key.name));
        Ok(())
    }

    fn add_data(&self, path: &StoragePath, value: Value) -> Result<(), Error> {
        self.data.write(path, value)
    }

    fn remove_data(&self, path: &StoragePath) -> Result<(), Error> {
        self.data.remove(path);
        Ok(())
    }

    fn query(
        &self,
        target: &TargetName,
        constraints: &[Constraint],
        review: &Review,
        opts: QueryOptions,
    ) -> Result<QueryOutcome, Error> {
        let mut results = Vec::new();
        let mut traces = Vec::new();

        let mut by_kind: std::collections::BTreeMap<&str, Vec<&Constraint>> = std::collections::BTreeMap::new();
        for constraint in constraints {
            by_kind.entry(&constraint.key.kind).or_default().push(constraint);
        }

        for (kind, kind_constraints) in by_kind {
            let Some(compiled) = self.templates.get(&Self::key(target, kind)) else {
                for constraint in &kind_constraints {
                    results.push(RawViolation {
                        constraint: (*constraint).key.clone(),
                        msg: format!("no compiled template installed for kind '{kind}'"),
                        details: Value::Null,
                    });
                }
                continue;
            };

            let mut engine = compiled.engine.clone();
            if opts.trace {
                engine.set_enable_coverage(true);
            }
            if let Some(resolver) = self.external_data.lock().clone() {
                register_external_data_builtin(&mut engine, resolver);
            }

            let external_tree = self.data.transact(|root| root.clone());
            if let Err(e) = engine.add_data(json_to_regorus(external_tree)) {
                for constraint in &kind_constraints {
                    results.push(RawViolation {
                        constraint: (*constraint).key.clone(),
                        msg: format!("invalid referential data: {e}"),
                        details: Value::Null,
                    });
                }
                continue;
            }

            let input = serde_json::json!({
                "review": review.as_json(),
                "constraints": kind_constraints.iter().map(|c| serde_json::json!({"kind": c.key.kind, "name": c.key.name})).collect::<Vec<_>>(),
            });
            if let Err(e) = engine.set_input(json_to_regorus(input)) {
                for constraint in &kind_constraints {
                    results.push(RawViolation {
                        constraint: (*constraint).key.clone(),
                        msg: format!("invalid query input: {e}"),
                        details: Value::Null,
                    });
                }
                continue;
            }

            match engine.eval_rule(format!("data.{}.{VIOLATION_RULE}", rewrite::ENTRY_PACKAGE)) {
                Ok(value) => {
                    let json_value = serde_json::to_value(&value).unwrap_or(Value::Null);
                    match parse_violations(&json_value) {
                        Ok(parsed) => results.extend(parsed),
                        Err(reason) => {
                            for constraint in &kind_constraints {
                                results.push(RawViolation {
                                    constraint: (*constraint).key.clone(),
                                    msg: reason.clone(),
                                    details: Value::Null,
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    for constraint in &kind_constraints {
                        results.push(RawViolation {
                            constraint: (*constraint).key.clone(),
                            msg: e.to_string(),
                            details: Value::Null,
                        });
                    }
                }
            }

            if opts.trace {
                if let Ok(report) = engine.get_coverage_report() {
                    if let Ok(pretty) = report.to_string_pretty() {
                        traces.push(pretty);
                    }
                }
            }

            let _ = compiled.generate_external_enforcement;
        }

        Ok(QueryOutcome { results, trace: if traces.is_empty() { None } else { Some(traces.join("\n\n")) } })
    }

    fn dump(&self) -> Result<String, Error> {
        let snapshot = self.data.transact(|root| root.clone());
        serde_json::to_string_pretty(&snapshot).map_err(|e| Error::Read { path: "/".to_owned(), reason: e.to_string() })
    }
}

fn json_to_regorus(value: Value) -> regorus::Value {
    serde_json::from_value(value).unwrap_or(regorus::Value::Null)
}

/// Registers the `external_data.lookup` builtin (§4.5 step 5): given
/// `{"provider": name, "keys": [...]}`, performs the lookup via `resolver`
/// and returns `{"items": [...], "system_error": string?}`. Memoized per
/// query by `(provider, keys)` so repeat calls within one evaluation are
/// deterministic and avoid redundant network round-trips.
fn register_external_data_builtin(engine: &mut regorus::Engine, resolver: Arc<dyn ExternalDataResolver>) {
    let memo: DashMap<(String, String), Value> = DashMap::new();
    let _ = engine.add_extension(
        "external_data_lookup".to_owned(),
        1,
        Box::new(move |params: Vec<regorus::Value>| -> anyhow::Result<regorus::Value> {
            let request: Value = params
                .first()
                .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            let provider = request.get("provider").and_then(Value::as_str).unwrap_or_default().to_owned();
            let keys: Vec<Value> = request.get("keys").and_then(Value::as_array).cloned().unwrap_or_default();
            let memo_key = (provider.clone(), serde_json::to_string(&keys).unwrap_or_default());

            let response = memo
                .entry(memo_key)
                .or_insert_with(|| serde_json::to_value(resolver.lookup(&provider, &keys)).unwrap_or(Value::Null))
                .clone();
            Ok(json_to_regorus(response))
        }),
    );
}

fn parse_violations(value: &Value) -> Result<Vec<RawViolation>, String> {
    let Some(entries) = value.as_array() else {
        if value.is_null() {
            return Ok(Vec::new());
        }
        return Err("violation rule did not evaluate to a set".to_owned());
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let msg = entry
            .get("msg")
            .and_then(Value::as_str)
            .ok_or_else(|| "violation binding is missing 'msg'".to_owned())?
            .to_owned();
        let key = entry.get("key").ok_or_else(|| "violation binding is missing 'key'".to_owned())?;
        let kind = key.get("kind").and_then(Value::as_str).ok_or_else(|| "violation 'key' is missing 'kind'".to_owned())?;
        let name = key.get("name").and_then(Value::as_str).ok_or_else(|| "violation 'key' is missing 'name'".to_owned())?;
        let details = entry.get("details").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        out.push(RawViolation {
            constraint: ConstraintKey { kind: kind.to_owned(), name: name.to_owned() },
            msg,
            details,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::model::{CodeEntry, EnforcementActionModel, MatchCriteria, Target};
    use std::collections::BTreeMap;

    fn template(kind: &str, rego: &str) -> ConstraintTemplate {
        ConstraintTemplate {
            kind: kind.to_owned(),
            schema: None,
            legacy_schema: false,
            targets: vec![Target {
                target: "admission.k8s.example.sh".to_owned(),
                code: vec![CodeEntry {
                    engine: "Rego".to_owned(),
                    source: serde_json::json!({"rego": rego, "libs": [], "version": "v1"}),
                    generate_external_enforcement: None,
                }],
                operations: None,
            }],
        }
    }

    fn constraint(kind: &str, name: &str, params: Value) -> Constraint {
        Constraint {
            key: ConstraintKey { kind: kind.to_owned(), name: name.to_owned() },
            parameters: Some(params),
            r#match: MatchCriteria::default(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            enforcement_action: EnforcementActionModel::Single("deny".to_owned()),
        }
    }

    #[derive(serde::Serialize)]
    struct TestReview {
        name: String,
    }

    #[test]
    fn add_template_rejects_missing_violation_rule() {
        let driver = RegoDriver::default();
        let template = template("K", "package hooks\n\nallow { true }");
        let err = driver.add_template(&"admission.k8s.example.sh".to_owned(), &template).unwrap_err();
        assert!(matches!(err, Error::InvalidModule { .. }));
    }

    #[test]
    fn add_template_rejects_violation_mentioned_only_in_a_comment() {
        let driver = RegoDriver::default();
        let template = template("K", "package hooks\n\n# no violation rule here\nallow { true }");
        let err = driver.add_template(&"admission.k8s.example.sh".to_owned(), &template).unwrap_err();
        assert!(matches!(err, Error::InvalidModule { .. }));
    }

    #[test]
    fn add_template_then_query_reports_violations_per_constraint() {
        let driver = RegoDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let rego = r#"
package hooks

violation[result] {
    some c
    input.constraints[c].kind == "K"
    params := data.constraints[input.constraints[c].kind][input.constraints[c].name]
    input.review.name != params.required_name
    result := {"msg": "name mismatch", "key": input.constraints[c]}
}
"#;
        driver.add_template(&target, &template("K", rego)).unwrap();
        driver.add_constraint(&target, &constraint("K", "n1", serde_json::json!({"required_name": "expected"}))).unwrap();

        let review = Review::new(TestReview { name: "actual".to_owned() });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", serde_json::json!({"required_name": "expected"}))], &review, QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].msg, "name mismatch");
    }

    #[test]
    fn query_against_uninstalled_kind_yields_synthetic_result() {
        let driver = RegoDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let review = Review::new(TestReview { name: "actual".to_owned() });
        let outcome = driver
            .query(&target, &[constraint("Missing", "n1", Value::Null)], &review, QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].msg.contains("no compiled template"));
    }

    #[test]
    fn remove_template_is_idempotent() {
        let driver = RegoDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        assert!(driver.remove_template(&target, "K").is_ok());
        assert!(driver.remove_template(&target, "K").is_ok());
    }
}
