// SPDX-License-Identifier: Apache-2.0

//! The Client's mutable state: installed templates (each with its compiled
//! parameter-schema validator, built once at `AddTemplate` time) and
//! installed constraints, keyed the way §3 defines.

use std::collections::BTreeMap;
use warden_core::model::{Constraint, ConstraintKey, ConstraintTemplate};

/// A template plus the schema validator compiled from its `schema` field, if
/// any. Compiling once at install time avoids re-parsing the schema on every
/// `AddConstraint` call.
pub(crate) struct InstalledTemplate {
    pub(crate) template: ConstraintTemplate,
    pub(crate) schema_validator: Option<jsonschema::Validator>,
}

/// Every template and constraint currently installed, guarded by the
/// Client's single read-write lock.
#[derive(Default)]
pub(crate) struct ClientState {
    pub(crate) templates: BTreeMap<String, InstalledTemplate>,
    pub(crate) constraints: BTreeMap<ConstraintKey, Constraint>,
}

impl ClientState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}
