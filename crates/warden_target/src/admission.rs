// SPDX-License-Identifier: Apache-2.0

//! A reference Target Handler modeling cluster-admission-style review: the
//! object under review, plus optional old-object and user-info context for
//! updates, scoped by namespace/label selectors.

use crate::cache::{Cache, InMemoryCache};
use crate::handler::TargetHandler;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use warden_core::action::BoxedMatcher;
use warden_core::error::Error;
use warden_core::model::{Constraint, MatchCriteria, Review};
use warden_core::path::StoragePath;

/// Parses a flat `{key: string}` label map out of an arbitrary JSON value
/// (a namespace cache entry, or an object's `metadata.labels`).
fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// The adapted review value this handler produces (§3: "Handlers may wrap
/// the raw object with additional context").
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// The object under review.
    pub object: Value,
    /// The object's prior state, for updates.
    pub old_object: Option<Value>,
    /// The admission operation (`CREATE`, `UPDATE`, `DELETE`, `CONNECT`),
    /// present only for admission-time reviews.
    pub operation: Option<String>,
    /// Caller identity context, if supplied.
    pub user_info: Option<Value>,
    /// True for an admission-time (webhook) review; false for audit, where
    /// the caller passes a bare object with no operation wrapper.
    pub is_admission_request: bool,
}

impl AdmissionReview {
    /// The object's namespace, if it declares one under `metadata.namespace`.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.object.get("metadata")?.get("namespace")?.as_str()
    }

    /// The object's flat label map under `metadata.labels`.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.object
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .map(labels_of)
            .unwrap_or_default()
    }
}

/// A reference admission-style target handler.
pub struct AdmissionTargetHandler {
    name: String,
    namespace_cache: Arc<InMemoryCache>,
}

impl AdmissionTargetHandler {
    /// Creates a handler bound to `name` (e.g. `admission.k8s.example.sh`).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace_cache: Arc::new(InMemoryCache::new()),
        }
    }

    /// Seeds the namespace cache with a namespace's label map, so matchers
    /// can resolve label selectors without an extra lookup.
    pub fn put_namespace_labels(&self, namespace: &str, labels: Value) {
        self.namespace_cache.put(namespace, labels);
    }
}

impl TargetHandler for AdmissionTargetHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_data(&self, object: &Value) -> Result<Option<(StoragePath, Value)>, Error> {
        let Some(kind) = object.get("kind").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(resource_name) = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let key = StoragePath::handler_root(&self.name)
            .extend("data")
            .extend(kind)
            .extend(resource_name);
        Ok(Some((key, object.clone())))
    }

    fn handle_review(&self, object: &Value) -> Result<Option<Review>, Error> {
        if object.get("operation").is_some() {
            let Some(inner) = object.get("object") else {
                return Ok(None);
            };
            return Ok(Some(Review::new(AdmissionReview {
                object: inner.clone(),
                old_object: object.get("oldObject").cloned(),
                operation: object.get("operation").and_then(Value::as_str).map(str::to_owned),
                user_info: object.get("userInfo").cloned(),
                is_admission_request: true,
            })));
        }
        if object.get("kind").is_none() {
            return Ok(None);
        }
        Ok(Some(Review::new(AdmissionReview {
            object: object.clone(),
            old_object: None,
            operation: None,
            user_info: None,
            is_admission_request: false,
        })))
    }

    fn match_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "namespaces": {"type": "array", "items": {"type": "string"}},
                "excludedNamespaces": {"type": "array", "items": {"type": "string"}},
                "labelSelector": {"type": "object", "additionalProperties": {"type": "string"}},
            },
        })
    }

    fn validate_constraint(&self, constraint: &Constraint) -> Result<(), Error> {
        if let (Some(namespaces), Some(excluded)) =
            (&constraint.r#match.namespaces, &constraint.r#match.excluded_namespaces)
        {
            if let Some(overlap) = namespaces.iter().find(|ns| excluded.contains(ns)) {
                return Err(Error::InvalidConstraint {
                    kind: constraint.key.kind.clone(),
                    name: constraint.key.name.clone(),
                    reason: format!("namespace '{overlap}' is both included and excluded"),
                });
            }
        }
        Ok(())
    }

    fn to_matcher(&self, constraint: &Constraint) -> Result<BoxedMatcher, Error> {
        let criteria: MatchCriteria = constraint.r#match.clone();
        let namespace_cache = Arc::clone(&self.namespace_cache);
        Ok(Arc::new(move |review: &Review| {
            let Some(review) = review.downcast_ref::<AdmissionReview>() else {
                return Ok(false);
            };
            let namespace = review.namespace();

            if let Some(namespaces) = &criteria.namespaces {
                match namespace {
                    Some(ns) if namespaces.iter().any(|n| n == ns) => {}
                    _ => return Ok(false),
                }
            }
            if let Some(excluded) = &criteria.excluded_namespaces {
                if let Some(ns) = namespace {
                    if excluded.iter().any(|n| n == ns) {
                        return Ok(false);
                    }
                }
            }
            if let Some(selector) = &criteria.label_selector {
                let mut labels = review.labels();
                if let Some(ns) = namespace {
                    match namespace_cache.get(ns) {
                        Some(ns_labels) => {
                            for (k, v) in labels_of(&ns_labels) {
                                labels.entry(k).or_insert(v);
                            }
                        }
                        None => return Err(Error::NotFound { path: format!("namespace/{ns}") }),
                    }
                }
                return Ok(selector.iter().all(|(k, v)| labels.get(k) == Some(v)));
            }
            Ok(true)
        }))
    }

    fn cache(&self) -> Option<&dyn Cache> {
        Some(self.namespace_cache.as_ref())
    }
}
