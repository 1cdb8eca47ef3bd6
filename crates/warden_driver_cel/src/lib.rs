// SPDX-License-Identifier: Apache-2.0

//! The CEL driver (§4.6): compiles a template's variables, validations, and
//! match conditions into CEL programs, and evaluates them against the
//! combined environment `{object, oldObject, request, variables, params}`.

use cel_interpreter::objects::{Key as CelKey, Map as CelMap};
use cel_interpreter::{Context, Program, Value as CelValue};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use warden_core::error::Error;
use warden_core::model::{Constraint, ConstraintKey, ConstraintTemplate, RawViolation, Review, TargetName};
use warden_core::path::StoragePath;
use warden_core::store::Store;
use warden_driver::{Driver, QueryOptions, QueryOutcome};

/// Variable and match-condition names may not begin with this reserved
/// prefix (§4.6 step 1).
const RESERVED_PREFIX: &str = "g8r_";
/// The name the driver itself binds to a constraint's parameters; templates
/// may not declare a variable with this name.
const PARAMS_VAR: &str = "params";
/// The legacy per-constraint label alias for the external-enforcement hint
/// (§9 open question (a)). The per-Code boolean is authoritative; this is
/// consulted only as a constraint-level override, since the core model has
/// no dedicated per-constraint boolean field for it.
const USE_EXTERNAL_ENFORCEMENT_LABEL: &str = "gatekeeper.sh/use-vap";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    Fail,
    Ignore,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Fail
    }
}

#[derive(Clone, Hash, Eq, PartialEq)]
struct TemplateKey {
    target: TargetName,
    kind: String,
}

struct CompiledValidation {
    expression: Program,
    message: Option<String>,
    message_expression: Option<Program>,
}

struct CompiledCelTemplate {
    variables: Vec<(String, Program)>,
    match_conditions: Vec<(String, Program)>,
    validations: Vec<CompiledValidation>,
    failure_policy: FailurePolicy,
    /// Effective template-level external-enforcement hint, already resolved
    /// against the core `generate_external_enforcement` field and the
    /// payload's legacy `generateVAP` boolean (§9 open question (a)).
    external_enforcement_hint: Option<bool>,
}

/// The CEL (`K8sNativeValidation`) driver.
pub struct CelDriver {
    templates: DashMap<TemplateKey, Arc<CompiledCelTemplate>>,
    constraint_params: Store,
    /// Default for "assume an external policy-admission mechanism enforces
    /// this template" when neither the template nor the constraint override
    /// it (§4.6 step 5).
    assume_external_enforcement: bool,
}

impl CelDriver {
    /// Creates a driver with the given default external-enforcement
    /// assumption.
    #[must_use]
    pub fn new(assume_external_enforcement: bool) -> Self {
        Self {
            templates: DashMap::new(),
            constraint_params: Store::default(),
            assume_external_enforcement,
        }
    }

    fn key(target: &TargetName, kind: &str) -> TemplateKey {
        TemplateKey { target: target.clone(), kind: kind.to_owned() }
    }

    fn effective_hint(&self, template_hint: Option<bool>, constraint: &Constraint) -> bool {
        if let Some(raw) = constraint.labels.get(USE_EXTERNAL_ENFORCEMENT_LABEL) {
            return raw == "true";
        }
        template_hint.unwrap_or(self.assume_external_enforcement)
    }
}

impl Default for CelDriver {
    fn default() -> Self {
        Self::new(false)
    }
}

fn check_name_hygiene(kind: &str, what: &str, name: &str) -> Result<(), Error> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(Error::InvalidConstraintTemplate {
            kind: kind.to_owned(),
            reason: format!("{what} name '{name}' begins with the reserved prefix '{RESERVED_PREFIX}'"),
        });
    }
    if name == PARAMS_VAR {
        return Err(Error::InvalidConstraintTemplate {
            kind: kind.to_owned(),
            reason: format!("{what} name '{name}' is reserved for the injected parameters variable"),
        });
    }
    Ok(())
}

fn compile(kind: &str, source_ref: &str, expr: &str) -> Result<Program, Error> {
    Program::compile(expr).map_err(|e| Error::Compile { source_ref: format!("{kind}/{source_ref}"), reason: e.to_string() })
}

impl Driver for CelDriver {
    fn name(&self) -> &str {
        "K8sNativeValidation"
    }

    fn add_template(&self, target: &TargetName, template: &ConstraintTemplate) -> Result<(), Error> {
        let Some(binding) = template.targets.iter().find(|t| &t.target == target) else {
            return Ok(());
        };
        let Some(code) = binding.code.iter().find(|c| c.engine == self.name()) else {
            // This driver has no source for this target (§ "Multi-target
            // templates": the CEL driver implicitly ignores targets it
            // cannot handle rather than rejecting the template).
            return Ok(());
        };

        let payload = &code.source;

        let payload_hint = payload.get("generateVAP").and_then(Value::as_bool);
        let external_enforcement_hint = match (code.generate_external_enforcement, payload_hint) {
            (Some(core), Some(legacy)) if core != legacy => {
                log::warn!(
                    "template '{}' has conflicting generateVAP hints (core field={core}, payload field={legacy}); preferring the core field",
                    template.kind
                );
                Some(core)
            }
            (Some(core), _) => Some(core),
            (None, Some(legacy)) => Some(legacy),
            (None, None) => None,
        };

        let failure_policy = match payload.get("failurePolicy").and_then(Value::as_str) {
            None | Some("Fail") => FailurePolicy::Fail,
            Some("Ignore") => FailurePolicy::Ignore,
            Some(other) => {
                return Err(Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: format!("unknown failurePolicy '{other}'"),
                })
            }
        };

        let mut variables = Vec::new();
        for entry in payload.get("variables").and_then(Value::as_array).into_iter().flatten() {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: "variable entry is missing 'name'".to_owned(),
                })?;
            let expression = entry
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: format!("variable '{name}' is missing 'expression'"),
                })?;
            check_name_hygiene(&template.kind, "variable", name)?;
            variables.push((name.to_owned(), compile(&template.kind, &format!("variables.{name}"), expression)?));
        }

        let mut match_conditions = Vec::new();
        for entry in payload.get("matchConditions").and_then(Value::as_array).into_iter().flatten() {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: "matchCondition entry is missing 'name'".to_owned(),
                })?;
            let expression = entry
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: format!("matchCondition '{name}' is missing 'expression'"),
                })?;
            check_name_hygiene(&template.kind, "matchCondition", name)?;
            match_conditions.push((name.to_owned(), compile(&template.kind, &format!("matchConditions.{name}"), expression)?));
        }

        let raw_validations = payload.get("validations").and_then(Value::as_array).map(|v| v.as_slice()).unwrap_or_default();
        if raw_validations.is_empty() {
            return Err(Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: "template declares no validations".to_owned(),
            });
        }
        let mut validations = Vec::with_capacity(raw_validations.len());
        for (i, entry) in raw_validations.iter().enumerate() {
            let expression = entry
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidConstraintTemplate {
                    kind: template.kind.clone(),
                    reason: format!("validation #{i} is missing 'expression'"),
                })?;
            let message = entry.get("message").and_then(Value::as_str).map(str::to_owned);
            let message_expression = entry
                .get("messageExpression")
                .and_then(Value::as_str)
                .map(|e| compile(&template.kind, &format!("validations[{i}].messageExpression"), e))
                .transpose()?;
            validations.push(CompiledValidation {
                expression: compile(&template.kind, &format!("validations[{i}].expression"), expression)?,
                message,
                message_expression,
            });
        }

        let compiled = CompiledCelTemplate { variables, match_conditions, validations, failure_policy, external_enforcement_hint };
        let _ = self.templates.insert(Self::key(target, &template.kind), Arc::new(compiled));
        Ok(())
    }

    fn remove_template(&self, target: &TargetName, kind: &str) -> Result<(), Error> {
        let _ = self.templates.remove(&Self::key(target, kind));
        self.constraint_params.remove_prefix(&StoragePath::from_segments(["constraints", kind]));
        Ok(())
    }

    fn add_constraint(&self, _target: &TargetName, constraint: &Constraint) -> Result<(), Error> {
        let params = constraint.parameters.clone().unwrap_or_else(|| Value::Object(Default::default()));
        self.constraint_params.write(&StoragePath::constraint_params(&constraint.key.kind, &constraint.key.name), params)
    }

    fn remove_constraint(&self, _target: &TargetName, key: &ConstraintKey) -> Result<(), Error> {
        self.constraint_params.remove(&StoragePath::constraint_params(&key.kind, &key.name));
        Ok(())
    }

    fn add_data(&self, _path: &StoragePath, _value: Value) -> Result<(), Error> {
        // The CEL validation environment is limited to object/oldObject/
        // request/variables/params (§4.6); referential data has no wiring
        // point here today. Accepted for parity with the Driver contract.
        Ok(())
    }

    fn remove_data(&self, _path: &StoragePath) -> Result<(), Error> {
        Ok(())
    }

    fn query(
        &self,
        target: &TargetName,
        constraints: &[Constraint],
        review: &Review,
        _opts: QueryOptions,
    ) -> Result<QueryOutcome, Error> {
        let review_json = review.as_json();
        let is_admission_request = review_json.get("isAdmissionRequest").and_then(Value::as_bool).unwrap_or(false);
        let object = review_json.get("object").cloned().unwrap_or(Value::Null);
        let old_object = review_json.get("oldObject").cloned().unwrap_or(Value::Null);
        let request = serde_json::json!({
            "operation": review_json.get("operation").cloned().unwrap_or(Value::Null),
            "userInfo": review_json.get("userInfo").cloned().unwrap_or(Value::Null),
        });

        let mut results = Vec::new();
        for constraint in constraints {
            let Some(compiled) = self.templates.get(&Self::key(target, &constraint.key.kind)) else {
                continue;
            };

            if is_admission_request && self.effective_hint(compiled.external_enforcement_hint, constraint) {
                continue;
            }

            match evaluate_one(&compiled, constraint, &object, &old_object, &request) {
                Ok(violations) => results.extend(violations),
                Err(reason) => {
                    if compiled.failure_policy == FailurePolicy::Fail {
                        results.push(RawViolation { constraint: constraint.key.clone(), msg: reason, details: Value::Null });
                    }
                }
            }
        }

        Ok(QueryOutcome { results, trace: None })
    }

    fn dump(&self) -> Result<String, Error> {
        let snapshot = self.constraint_params.transact(|root| root.clone());
        serde_json::to_string_pretty(&snapshot).map_err(|e| Error::Read { path: "/".to_owned(), reason: e.to_string() })
    }
}

fn evaluate_one(
    compiled: &CompiledCelTemplate,
    constraint: &Constraint,
    object: &Value,
    old_object: &Value,
    request: &Value,
) -> Result<Vec<RawViolation>, String> {
    let params = constraint.parameters.clone().unwrap_or_else(|| Value::Object(Default::default()));

    let mut ctx = Context::default();
    ctx.add_variable("object", json_to_cel(object)).map_err(|e| e.to_string())?;
    ctx.add_variable("oldObject", json_to_cel(old_object)).map_err(|e| e.to_string())?;
    ctx.add_variable("request", json_to_cel(request)).map_err(|e| e.to_string())?;
    ctx.add_variable(PARAMS_VAR, json_to_cel(&params)).map_err(|e| e.to_string())?;

    let mut variables_map: HashMap<CelKey, CelValue> = HashMap::new();
    for (name, program) in &compiled.variables {
        ctx.add_variable("variables", CelValue::Map(CelMap { map: Arc::new(variables_map.clone()) }))
            .map_err(|e| e.to_string())?;
        let value = program.execute(&ctx).map_err(|e| format!("variable '{name}': {e}"))?;
        variables_map.insert(CelKey::String(Arc::new(name.clone())), value);
    }
    ctx.add_variable("variables", CelValue::Map(CelMap { map: Arc::new(variables_map) })).map_err(|e| e.to_string())?;

    for (name, program) in &compiled.match_conditions {
        let value = program.execute(&ctx).map_err(|e| format!("matchCondition '{name}': {e}"))?;
        if as_bool(&value) != Some(true) {
            return Ok(Vec::new());
        }
    }

    let mut violations = Vec::new();
    for (i, validation) in compiled.validations.iter().enumerate() {
        let value = validation.expression.execute(&ctx).map_err(|e| format!("validation #{i}: {e}"))?;
        if as_bool(&value) == Some(true) {
            continue;
        }
        let msg = if let Some(expr) = &validation.message_expression {
            let rendered = expr.execute(&ctx).map_err(|e| format!("validation #{i} messageExpression: {e}"))?;
            as_string(&rendered).unwrap_or_else(|| format!("validation #{i} failed"))
        } else {
            validation.message.clone().unwrap_or_else(|| format!("validation #{i} failed"))
        };
        violations.push(RawViolation { constraint: constraint.key.clone(), msg, details: Value::Null });
    }
    Ok(violations)
}

fn as_bool(value: &CelValue) -> Option<bool> {
    match value {
        CelValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn as_string(value: &CelValue) -> Option<String> {
    match value {
        CelValue::String(s) => Some(s.as_str().to_owned()),
        _ => None,
    }
}

fn json_to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(json_to_cel).collect())),
        Value::Object(fields) => {
            let mut out = HashMap::with_capacity(fields.len());
            for (k, v) in fields {
                out.insert(CelKey::String(Arc::new(k.clone())), json_to_cel(v));
            }
            CelValue::Map(CelMap { map: Arc::new(out) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::model::{CodeEntry, EnforcementActionModel, MatchCriteria, Target};
    use std::collections::BTreeMap;

    fn template_with_payload(kind: &str, payload: Value) -> ConstraintTemplate {
        ConstraintTemplate {
            kind: kind.to_owned(),
            schema: None,
            legacy_schema: false,
            targets: vec![Target {
                target: "admission.k8s.example.sh".to_owned(),
                code: vec![CodeEntry { engine: "K8sNativeValidation".to_owned(), source: payload, generate_external_enforcement: None }],
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
        object: Value,
        #[serde(rename = "isAdmissionRequest")]
        is_admission_request: bool,
    }

    #[test]
    fn add_template_rejects_reserved_variable_name() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "variables": [{"name": "params", "expression": "1"}],
            "validations": [{"expression": "true", "message": "no"}],
        });
        let err = driver.add_template(&target, &template_with_payload("K", payload)).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraintTemplate { .. }));
    }

    #[test]
    fn add_template_rejects_reserved_prefix() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "matchConditions": [{"name": "g8r_internal", "expression": "true"}],
            "validations": [{"expression": "true", "message": "no"}],
        });
        let err = driver.add_template(&target, &template_with_payload("K", payload)).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraintTemplate { .. }));
    }

    #[test]
    fn add_template_requires_at_least_one_validation() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({"validations": []});
        let err = driver.add_template(&target, &template_with_payload("K", payload)).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraintTemplate { .. }));
    }

    #[test]
    fn query_reports_violation_for_failed_validation() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "validations": [{"expression": "object.name == params.required_name", "message": "name mismatch"}],
        });
        driver.add_template(&target, &template_with_payload("K", payload)).unwrap();

        let review = Review::new(TestReview { object: serde_json::json!({"name": "actual"}), is_admission_request: false });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", serde_json::json!({"required_name": "expected"}))], &review, QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].msg, "name mismatch");
    }

    #[test]
    fn query_skips_admission_review_when_hint_is_true() {
        let driver = CelDriver::new(true);
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "validations": [{"expression": "false", "message": "always fails"}],
        });
        driver.add_template(&target, &template_with_payload("K", payload)).unwrap();

        let review = Review::new(TestReview { object: Value::Null, is_admission_request: true });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", Value::Null)], &review, QueryOptions::default())
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn query_does_not_skip_audit_review_even_with_hint() {
        let driver = CelDriver::new(true);
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "validations": [{"expression": "false", "message": "always fails"}],
        });
        driver.add_template(&target, &template_with_payload("K", payload)).unwrap();

        let review = Review::new(TestReview { object: Value::Null, is_admission_request: false });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", Value::Null)], &review, QueryOptions::default())
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn query_suppresses_errors_under_ignore_failure_policy() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "failurePolicy": "Ignore",
            "validations": [{"expression": "object.missing.deeply.nested", "message": "no"}],
        });
        driver.add_template(&target, &template_with_payload("K", payload)).unwrap();

        let review = Review::new(TestReview { object: Value::Null, is_admission_request: false });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", Value::Null)], &review, QueryOptions::default())
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn match_condition_false_filters_constraint_with_no_result() {
        let driver = CelDriver::default();
        let target = "admission.k8s.example.sh".to_owned();
        let payload = serde_json::json!({
            "matchConditions": [{"name": "onlyFoo", "expression": "object.kind == \"Foo\""}],
            "validations": [{"expression": "false", "message": "always fails"}],
        });
        driver.add_template(&target, &template_with_payload("K", payload)).unwrap();

        let review = Review::new(TestReview { object: serde_json::json!({"kind": "Bar"}), is_admission_request: false });
        let outcome = driver
            .query(&target, &[constraint("K", "n1", Value::Null)], &review, QueryOptions::default())
            .unwrap();
        assert!(outcome.results.is_empty());
    }
}
