// SPDX-License-Identifier: Apache-2.0

//! The Target Handler abstraction (§4.2): a polymorphic capability bundle
//! that classifies objects for one target domain, adapts them into a
//! review value, and builds per-constraint matchers.

use crate::cache::Cache;
use serde_json::Value;
use warden_core::action::BoxedMatcher;
use warden_core::error::Error;
use warden_core::model::{Constraint, Review};
use warden_core::path::StoragePath;

/// A target handler, registered once at client construction and immutable
/// thereafter (§4.2).
pub trait TargetHandler: Send + Sync {
    /// The unique target identifier, e.g. `admission.k8s.example.sh`.
    fn name(&self) -> &str;

    /// Decides whether this handler owns `object`; if so, returns the
    /// storage key and the form to persist under it.
    fn process_data(&self, object: &Value) -> Result<Option<(StoragePath, Value)>, Error>;

    /// Adapts `object` into this handler's review form, declining inputs it
    /// does not recognize as admissible.
    fn handle_review(&self, object: &Value) -> Result<Option<Review>, Error>;

    /// The JSON-schema fragment for the `match` block of constraints bound
    /// to this target, used to validate constraints at install time.
    fn match_schema(&self) -> Value;

    /// Domain-specific constraint validation beyond the match schema (e.g.
    /// forbidden enforcement actions for this target).
    fn validate_constraint(&self, constraint: &Constraint) -> Result<(), Error>;

    /// Builds a per-constraint matcher.
    fn to_matcher(&self, constraint: &Constraint) -> Result<BoxedMatcher, Error>;

    /// The handler's object cache, if any. Absent is equivalent to an empty
    /// cache; matchers must tolerate a cache-miss (§4.2).
    fn cache(&self) -> Option<&dyn Cache> {
        None
    }
}
