// SPDX-License-Identifier: Apache-2.0

//! The Client facade (§4.8): `AddTemplate`/`RemoveTemplate`/`AddConstraint`/
//! `RemoveConstraint`/`AddData`/`Review`, each serialized through a single
//! read-write lock (§5) so a `Review` always observes a consistent snapshot.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use warden_core::action::{resolve_enforcement_actions, Matcher};
use warden_core::error::Error;
use warden_core::model::{Constraint, ConstraintKey, ConstraintTemplate, EngineId, EnforcementPoint, EvaluationResult, TargetName};
use warden_common::diagnostic::DiagnosticMessages;
use warden_driver::{Driver, QueryOptions};
use warden_target::handler::TargetHandler;
use warden_target::registry::TargetRegistry;

use crate::responses::{Response, Responses};
use crate::state::{ClientState, InstalledTemplate};

/// Wraps a driver-local compilation error into the install-path error `wrap`
/// builds (§7: `ErrInvalidModule`/`ErrParse`/`ErrCompile` are wrapped inside
/// `ErrInvalidConstraintTemplate`/`ErrInvalidConstraint` on the install path),
/// so callers only ever match on the install-path kind. Errors already of the
/// target kind, or unrelated to compilation, pass through unchanged.
fn wrap_install_error(err: Error, wrap: impl FnOnce(String) -> Error) -> Error {
    match err {
        Error::InvalidConstraintTemplate { .. } | Error::InvalidConstraint { .. } => err,
        Error::InvalidModule { reason, .. } | Error::Parse { reason, .. } | Error::Compile { reason, .. } => wrap(reason),
        other => wrap(other.to_string()),
    }
}

/// Caller-supplied options for [`Client::review`].
#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    /// The enforcement points this review serves; a fired constraint whose
    /// resolved actions are empty at every one of these points contributes
    /// no result (§4.4, §4.8 step 4).
    pub enforcement_points: Vec<EnforcementPoint>,
    /// When true, ask each driver for an evaluation trace and collect it per
    /// target into the returned [`Responses`].
    pub trace: bool,
}

/// The referentially-consistent entry point (§4.8): a fixed registry of
/// target handlers and drivers, plus the mutable template/constraint state
/// they operate against.
pub struct Client {
    targets: TargetRegistry,
    drivers: BTreeMap<EngineId, Arc<dyn Driver>>,
    state: RwLock<ClientState>,
}

impl Client {
    /// Builds a client from an immutable target-handler registry and driver
    /// set. Handler uniqueness is enforced by [`TargetRegistry::new`];
    /// duplicate driver names are rejected here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CreatingDriver`] if two drivers share a name.
    pub fn new(targets: TargetRegistry, drivers: Vec<Arc<dyn Driver>>) -> Result<Self, Error> {
        let mut by_name = BTreeMap::new();
        for driver in drivers {
            let name = driver.name().to_owned();
            if by_name.insert(name.clone(), driver).is_some() {
                return Err(Error::CreatingDriver { driver: name, reason: "duplicate driver name".to_owned() });
            }
        }
        Ok(Self { targets, drivers: by_name, state: RwLock::new(ClientState::new()) })
    }

    /// Removes every driver-side binding installed for `template` (used both
    /// when replacing an installed template and when removing it outright).
    fn teardown_template_bindings(&self, template: &ConstraintTemplate) {
        for target in &template.targets {
            for code in &target.code {
                if let Some(driver) = self.drivers.get(&code.engine) {
                    let _ = driver.remove_template(&target.target, &template.kind);
                }
            }
        }
    }

    /// Compiles and installs `template`, fanning out to every driver with a
    /// matching [`warden_core::model::CodeEntry`] engine across every target
    /// it binds (§4.8). On any driver error, already-accepted drivers are
    /// rolled back via a best-effort `RemoveTemplate`.
    ///
    /// Returns `true` when the template was newly installed, or replaced a
    /// template with different content; `false` when it is identical to the
    /// one already installed under this Kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConstraintTemplate`] if its schema fails to
    /// compile, if no driver accepts any of its Code entries, or if a driver
    /// rejects it (e.g. the Logic driver's single-target restriction).
    pub fn add_template(&self, template: ConstraintTemplate) -> Result<bool, Error> {
        let mut state = self.state.write();

        if let Some(installed) = state.templates.get(&template.kind) {
            if installed.template == template {
                return Ok(false);
            }
        }

        let schema_validator = match &template.schema {
            Some(schema) => Some(jsonschema::validator_for(schema).map_err(|e| Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: format!("schema does not compile: {e}"),
            })?),
            None => None,
        };

        if let Some(previous) = state.templates.get(&template.kind) {
            self.teardown_template_bindings(&previous.template);
        }

        let mut accepted: Vec<(Arc<dyn Driver>, TargetName)> = Vec::new();
        for target in &template.targets {
            for code in &target.code {
                let Some(driver) = self.drivers.get(&code.engine) else { continue };
                match driver.add_template(&target.target, &template) {
                    Ok(()) => accepted.push((Arc::clone(driver), target.target.clone())),
                    Err(err) => {
                        for (driver, target_name) in &accepted {
                            let _ = driver.remove_template(target_name, &template.kind);
                        }
                        return Err(wrap_install_error(err, |reason| Error::InvalidConstraintTemplate { kind: template.kind.clone(), reason }));
                    }
                }
            }
        }

        if accepted.is_empty() {
            return Err(Error::InvalidConstraintTemplate {
                kind: template.kind.clone(),
                reason: "no driver matches any Code entry across this template's targets".to_owned(),
            });
        }

        state.templates.insert(template.kind.clone(), InstalledTemplate { template, schema_validator });
        Ok(true)
    }

    /// Idempotently removes `kind`: tears down its driver-side bindings, then
    /// drops every constraint installed under it.
    pub fn remove_template(&self, kind: &str) {
        let mut state = self.state.write();
        let Some(installed) = state.templates.remove(kind) else { return };
        self.teardown_template_bindings(&installed.template);
        state.constraints.retain(|key, _| key.kind != kind);
    }

    /// Validates and installs `constraint`, fanning out to every driver
    /// bound to its template.
    ///
    /// Returns `false` when [`Constraint::semantically_equals`] holds
    /// against the currently-installed constraint of this key; `true`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConstraintTemplate`] if no template is
    /// installed for this Kind, [`Error::InvalidConstraint`] if it fails
    /// schema validation, or whatever a handling target or driver reports.
    pub fn add_constraint(&self, constraint: Constraint) -> Result<bool, Error> {
        let mut state = self.state.write();
        let kind = constraint.key.kind.clone();

        let template = {
            let Some(installed) = state.templates.get(&kind) else {
                return Err(Error::MissingConstraintTemplate { kind });
            };

            if let Some(existing) = state.constraints.get(&constraint.key) {
                if existing.semantically_equals(&constraint) {
                    return Ok(false);
                }
            }

            if let Some(validator) = &installed.schema_validator {
                let params = constraint.parameters.clone().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                if let Err(err) = validator.validate(&params) {
                    return Err(Error::InvalidConstraint {
                        kind: constraint.key.kind.clone(),
                        name: constraint.key.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            installed.template.clone()
        };

        for target in &template.targets {
            if let Some(handler) = self.targets.get(&target.target) {
                handler.validate_constraint(&constraint)?;
            }
        }

        let mut accepted: Vec<(Arc<dyn Driver>, TargetName)> = Vec::new();
        for target in &template.targets {
            for code in &target.code {
                let Some(driver) = self.drivers.get(&code.engine) else { continue };
                match driver.add_constraint(&target.target, &constraint) {
                    Ok(()) => accepted.push((Arc::clone(driver), target.target.clone())),
                    Err(err) => {
                        for (driver, target_name) in &accepted {
                            let _ = driver.remove_constraint(target_name, &constraint.key);
                        }
                        return Err(wrap_install_error(err, |reason| Error::InvalidConstraint {
                            kind: constraint.key.kind.clone(),
                            name: constraint.key.name.clone(),
                            reason,
                        }));
                    }
                }
            }
        }

        state.constraints.insert(constraint.key.clone(), constraint);
        Ok(true)
    }

    /// Idempotently removes the constraint at `key`.
    pub fn remove_constraint(&self, key: &ConstraintKey) {
        let mut state = self.state.write();
        if state.constraints.remove(key).is_none() {
            return;
        }
        let Some(installed) = state.templates.get(&key.kind) else { return };
        for target in &installed.template.targets {
            for code in &target.code {
                if let Some(driver) = self.drivers.get(&code.engine) {
                    let _ = driver.remove_constraint(&target.target, key);
                }
            }
        }
    }

    /// For every target handler that claims `object` via `ProcessData`,
    /// writes the normalized value at the returned path into every
    /// registered driver's referential-data channel.
    ///
    /// # Errors
    ///
    /// Returns whatever a target handler's `ProcessData` or a driver's
    /// `AddData` reports.
    pub fn add_data(&self, object: &Value) -> Result<(), Error> {
        let _state = self.state.write();
        for handler in self.targets.iter() {
            if let Some((path, value)) = handler.process_data(object)? {
                for driver in self.drivers.values() {
                    driver.add_data(&path, value.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Evaluates `object` against every installed constraint, for every
    /// target handler that claims it (§4.8 step-by-step). Holds the read
    /// lock across the whole call so a concurrent removal cannot tear state
    /// mid-evaluation.
    #[must_use]
    pub fn review(&self, object: &Value, opts: &ReviewOptions) -> Responses {
        let state = self.state.read();
        let mut responses = Vec::new();

        for handler in self.targets.iter() {
            let review = match handler.handle_review(object) {
                Ok(Some(review)) => review,
                Ok(None) => continue,
                Err(err) => {
                    responses.push(Response {
                        target: handler.name().to_owned(),
                        results: Vec::new(),
                        diagnostics: DiagnosticMessages::from_error(err),
                        trace: None,
                    });
                    continue;
                }
            };

            let mut diagnostics = DiagnosticMessages::empty();
            let mut survivors: Vec<&Constraint> = Vec::new();

            for constraint in state.constraints.values() {
                let Some(installed) = state.templates.get(&constraint.key.kind) else { continue };
                let belongs = installed.template.targets.iter().any(|t| t.target.as_str() == handler.name());
                if !belongs {
                    continue;
                }

                match handler.to_matcher(constraint) {
                    Ok(matcher) => match matcher.matches(&review) {
                        Ok(true) => survivors.push(constraint),
                        Ok(false) => {}
                        Err(Error::NotFound { .. }) => {}
                        Err(err) => diagnostics.extend(DiagnosticMessages::from_error(err)),
                    },
                    Err(err) => diagnostics.extend(DiagnosticMessages::from_error(err)),
                }
            }

            let mut by_engine_kind: BTreeMap<(EngineId, String), Vec<Constraint>> = BTreeMap::new();
            for constraint in &survivors {
                let Some(installed) = state.templates.get(&constraint.key.kind) else { continue };
                for target in &installed.template.targets {
                    if target.target.as_str() != handler.name() {
                        continue;
                    }
                    for code in &target.code {
                        if self.drivers.contains_key(&code.engine) {
                            by_engine_kind
                                .entry((code.engine.clone(), constraint.key.kind.clone()))
                                .or_default()
                                .push((*constraint).clone());
                        }
                    }
                }
            }

            let mut results = Vec::new();
            let mut trace_parts = Vec::new();
            let query_opts = QueryOptions { trace: opts.trace };
            let target_name = handler.name().to_owned();

            for ((engine, _kind), constraints) in by_engine_kind {
                let Some(driver) = self.drivers.get(&engine) else { continue };
                match driver.query(&target_name, &constraints, &review, query_opts) {
                    Ok(outcome) => {
                        if let Some(trace) = outcome.trace {
                            trace_parts.push(trace);
                        }
                        for raw in outcome.results {
                            let Some(constraint) = state.constraints.get(&raw.constraint) else { continue };
                            let per_point = resolve_enforcement_actions(constraint, &opts.enforcement_points);
                            let mut actions = BTreeSet::new();
                            for (_, acts) in per_point {
                                actions.extend(acts);
                            }
                            if actions.is_empty() {
                                continue;
                            }
                            results.push(EvaluationResult {
                                target: target_name.clone(),
                                msg: raw.msg,
                                details: raw.details,
                                constraint: constraint.clone(),
                                enforcement_actions: actions.into_iter().collect(),
                            });
                        }
                    }
                    Err(err) => diagnostics.extend(DiagnosticMessages::from_error(err)),
                }
            }

            results.sort_by(|a, b| (&a.enforcement_actions, &a.msg).cmp(&(&b.enforcement_actions, &b.msg)));

            let trace = if opts.trace && !trace_parts.is_empty() { Some(trace_parts.join("\n")) } else { None };

            responses.push(Response { target: target_name, results, diagnostics, trace });
        }

        Responses::new(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::model::{CodeEntry, Constraint, ConstraintTemplate, EnforcementActionModel, MatchCriteria, RawViolation, Review, Target};
    use warden_core::path::StoragePath;
    use warden_target::admission::AdmissionTargetHandler;

    const TARGET: &str = "admission.k8s.example.sh";

    fn template(kind: &str, engine: &str, schema: Option<Value>) -> ConstraintTemplate {
        ConstraintTemplate {
            kind: kind.to_owned(),
            schema,
            legacy_schema: false,
            targets: vec![Target {
                target: TARGET.to_owned(),
                code: vec![CodeEntry { engine: engine.to_owned(), source: json!({}), generate_external_enforcement: None }],
                operations: None,
            }],
        }
    }

    fn constraint(kind: &str, name: &str) -> Constraint {
        Constraint {
            key: ConstraintKey { kind: kind.to_owned(), name: name.to_owned() },
            parameters: None,
            r#match: MatchCriteria::default(),
            labels: Default::default(),
            annotations: Default::default(),
            enforcement_action: EnforcementActionModel::Single("deny".to_owned()),
        }
    }

    /// A stub driver recording every call it receives and returning
    /// caller-configured query results.
    #[derive(Default)]
    struct StubDriver {
        name: String,
        accept_templates: bool,
        violations: Vec<RawViolation>,
        add_template_calls: parking_lot::Mutex<u32>,
        remove_template_calls: parking_lot::Mutex<u32>,
    }

    impl StubDriver {
        fn new(name: &str) -> Self {
            Self { name: name.to_owned(), accept_templates: true, ..Default::default() }
        }
    }

    impl Driver for StubDriver {
        fn name(&self) -> &str {
            &self.name
        }

        fn add_template(&self, _target: &TargetName, _template: &ConstraintTemplate) -> Result<(), Error> {
            *self.add_template_calls.lock() += 1;
            if self.accept_templates {
                Ok(())
            } else {
                Err(Error::InvalidConstraintTemplate { kind: "K".to_owned(), reason: "stub rejects".to_owned() })
            }
        }

        fn remove_template(&self, _target: &TargetName, _kind: &str) -> Result<(), Error> {
            *self.remove_template_calls.lock() += 1;
            Ok(())
        }

        fn add_constraint(&self, _target: &TargetName, _constraint: &Constraint) -> Result<(), Error> {
            Ok(())
        }

        fn remove_constraint(&self, _target: &TargetName, _key: &ConstraintKey) -> Result<(), Error> {
            Ok(())
        }

        fn add_data(&self, _path: &StoragePath, _value: Value) -> Result<(), Error> {
            Ok(())
        }

        fn remove_data(&self, _path: &StoragePath) -> Result<(), Error> {
            Ok(())
        }

        fn query(&self, _target: &TargetName, _constraints: &[Constraint], _review: &Review, _opts: QueryOptions) -> Result<warden_driver::QueryOutcome, Error> {
            Ok(warden_driver::QueryOutcome { results: self.violations.clone(), trace: None })
        }

        fn dump(&self) -> Result<String, Error> {
            Ok(String::new())
        }
    }

    fn client_with(driver: StubDriver) -> Client {
        let handler: Arc<dyn TargetHandler> = Arc::new(AdmissionTargetHandler::new(TARGET));
        let registry = TargetRegistry::new(vec![handler]).unwrap();
        Client::new(registry, vec![Arc::new(driver)]).unwrap()
    }

    #[test]
    fn add_template_rejects_when_no_driver_matches_any_engine() {
        let client = client_with(StubDriver::new("Rego"));
        let err = client.add_template(template("K", "K8sNativeValidation", None)).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraintTemplate { .. }));
    }

    #[test]
    fn add_template_is_idempotent_for_identical_content() {
        let client = client_with(StubDriver::new("Rego"));
        assert!(client.add_template(template("K", "Rego", None)).unwrap());
        assert!(!client.add_template(template("K", "Rego", None)).unwrap());
    }

    #[test]
    fn add_constraint_requires_an_installed_template() {
        let client = client_with(StubDriver::new("Rego"));
        let err = client.add_constraint(constraint("Missing", "c1")).unwrap_err();
        assert!(matches!(err, Error::MissingConstraintTemplate { .. }));
    }

    #[test]
    fn add_constraint_rejects_parameters_failing_the_template_schema() {
        let client = client_with(StubDriver::new("Rego"));
        let schema = json!({"type": "object", "required": ["labels"]});
        client.add_template(template("K", "Rego", Some(schema))).unwrap();
        let err = client.add_constraint(constraint("K", "c1")).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraint { .. }));
    }

    #[test]
    fn add_constraint_is_idempotent_for_semantically_equal_content() {
        let client = client_with(StubDriver::new("Rego"));
        client.add_template(template("K", "Rego", None)).unwrap();
        assert!(client.add_constraint(constraint("K", "c1")).unwrap());
        assert!(!client.add_constraint(constraint("K", "c1")).unwrap());
    }

    #[test]
    fn remove_template_purges_its_constraints() {
        let client = client_with(StubDriver::new("Rego"));
        client.add_template(template("K", "Rego", None)).unwrap();
        client.add_constraint(constraint("K", "c1")).unwrap();
        client.remove_template("K");
        let err = client.add_constraint(constraint("K", "c1")).unwrap_err();
        assert!(matches!(err, Error::MissingConstraintTemplate { .. }));
    }

    #[test]
    fn remove_template_is_idempotent() {
        let client = client_with(StubDriver::new("Rego"));
        client.remove_template("never-installed");
    }

    #[test]
    fn review_returns_no_results_for_an_object_no_handler_claims() {
        let client = client_with(StubDriver::new("Rego"));
        let opts = ReviewOptions { enforcement_points: vec!["validation.gatekeeper.sh".to_owned()], trace: false };
        let responses = client.review(&json!({"unrelated": true}), &opts);
        assert_eq!(responses.handled_count(), 0);
    }

    #[test]
    fn review_drops_results_whose_actions_are_empty_at_every_requested_point() {
        let mut driver = StubDriver::new("Rego");
        driver.violations = vec![RawViolation {
            constraint: ConstraintKey { kind: "K".to_owned(), name: "c1".to_owned() },
            msg: "nope".to_owned(),
            details: json!({}),
        }];
        let client = client_with(driver);
        client.add_template(template("K", "Rego", None)).unwrap();
        client.add_constraint(constraint("K", "c1")).unwrap();

        let opts = ReviewOptions { enforcement_points: vec![], trace: false };
        let object = json!({"operation": "CREATE", "object": {"kind": "Pod", "metadata": {"name": "p1"}}});
        let responses = client.review(&object, &opts);
        assert_eq!(responses.handled_count(), 1);
        assert!(responses.results().is_empty());
    }

    #[test]
    fn review_surfaces_a_fired_constraint_with_resolved_actions() {
        let mut driver = StubDriver::new("Rego");
        driver.violations = vec![RawViolation {
            constraint: ConstraintKey { kind: "K".to_owned(), name: "c1".to_owned() },
            msg: "denied".to_owned(),
            details: json!({}),
        }];
        let client = client_with(driver);
        client.add_template(template("K", "Rego", None)).unwrap();
        client.add_constraint(constraint("K", "c1")).unwrap();

        let opts = ReviewOptions { enforcement_points: vec!["validation.gatekeeper.sh".to_owned()], trace: false };
        let object = json!({"operation": "CREATE", "object": {"kind": "Pod", "metadata": {"name": "p1"}}});
        let responses = client.review(&object, &opts);
        let results = responses.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].msg, "denied");
        assert_eq!(results[0].enforcement_actions, vec!["deny".to_owned()]);
    }
}
