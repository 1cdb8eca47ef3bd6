// SPDX-License-Identifier: Apache-2.0

//! The error kinds exposed to callers (§7).

use miette::Diagnostic;
use serde::Serialize;
use warden_common::error::{format_errors, WardenError};

/// Errors surfaced by the Storage Path, Template Canonicalizer, Driver,
/// and Client layers.
#[derive(Debug, Clone, thiserror::Error, Diagnostic, Serialize)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// Canonicalization failure: empty Kind, no registered engine, duplicate
    /// engines within a Target, or an invalid schema conversion.
    #[error("invalid constraint template '{kind}': {reason}")]
    InvalidConstraintTemplate {
        /// The template's Kind.
        kind: String,
        /// Why canonicalization failed.
        reason: String,
    },

    /// Schema validation failure or malformed parameters on a Constraint.
    #[error("invalid constraint '{kind}/{name}': {reason}")]
    InvalidConstraint {
        /// The constraint's Kind.
        kind: String,
        /// The constraint's Name.
        name: String,
        /// Why validation failed.
        reason: String,
    },

    /// `AddConstraint` for a Kind with no installed template.
    #[error("no constraint template installed for kind '{kind}'")]
    MissingConstraintTemplate {
        /// The missing template's Kind.
        kind: String,
    },

    /// The template's entry module does not define a `violation` rule.
    #[error("invalid module for template '{kind}': {reason}")]
    InvalidModule {
        /// The template's Kind.
        kind: String,
        /// Why the module is invalid.
        reason: String,
    },

    /// Source text failed to parse.
    #[error("parse error in '{source_ref}': {reason}")]
    Parse {
        /// A human-readable reference to the source (file path or Kind).
        source_ref: String,
        /// The parser's error message.
        reason: String,
    },

    /// Source text parsed but failed to compile.
    #[error("compile error in '{source_ref}': {reason}")]
    Compile {
        /// A human-readable reference to the source (file path or Kind).
        source_ref: String,
        /// The compiler's error message.
        reason: String,
    },

    /// Writing to the root path, or to a path whose parent is not an object.
    #[error("invalid write path '{path}'")]
    PathInvalid {
        /// The offending path, rendered.
        path: String,
    },

    /// A write failed for a reason other than an invalid path.
    #[error("write failed at '{path}': {reason}")]
    Write {
        /// The offending path, rendered.
        path: String,
        /// Why the write failed.
        reason: String,
    },

    /// A read failed (distinct from a cache-miss/not-found, which callers
    /// should treat as [`Error::NotFound`]).
    #[error("read failed at '{path}': {reason}")]
    Read {
        /// The offending path, rendered.
        path: String,
        /// Why the read failed.
        reason: String,
    },

    /// A value was looked up and was absent. Treated as a non-match by
    /// matchers rather than a fatal error (§4.4).
    #[error("not found: '{path}'")]
    NotFound {
        /// The offending path, rendered.
        path: String,
    },

    /// A store transaction could not be committed.
    #[error("transaction failed: {reason}")]
    Transaction {
        /// Why the transaction failed.
        reason: String,
    },

    /// Construction-time failure: an unknown extern was requested.
    #[error("cannot create driver '{driver}': {reason}")]
    CreatingDriver {
        /// The driver's name.
        driver: String,
        /// Why construction failed.
        reason: String,
    },

    /// A handler received an object it cannot interpret as the expected type.
    #[error("invalid type: expected {expected}")]
    InvalidType {
        /// The expected type's description.
        expected: String,
    },

    /// A handler received a well-typed but semantically invalid object.
    #[error("invalid object: {reason}")]
    InvalidObject {
        /// Why the object is invalid.
        reason: String,
    },

    /// A schema node carried no `type` during permissive-schema defaulting;
    /// it was treated as an object (§4.3 rule 2). Non-fatal.
    #[error("schema node at '{node_path}' has no type information; treated as object")]
    #[diagnostic(severity(Warning))]
    AmbiguousSchemaNode {
        /// A JSON-pointer-like path to the node within the schema.
        node_path: String,
    },

    /// A container for multiple errors collected from a batch operation.
    #[error("{}", format_errors(.0))]
    Compound(Vec<Error>),
}

impl WardenError for Error {
    fn compound(errors: Vec<Error>) -> Error {
        Error::Compound(
            errors
                .into_iter()
                .flat_map(|e| match e {
                    Error::Compound(errors) => errors,
                    e => vec![e],
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_flattens_nested_compounds() {
        let err = Error::compound(vec![
            Error::PathInvalid { path: "/".to_owned() },
            Error::Compound(vec![Error::NotFound { path: "/a".to_owned() }]),
        ]);
        match err {
            Error::Compound(errors) => assert_eq!(errors.len(), 2),
            _ => panic!("expected compound"),
        }
    }
}
