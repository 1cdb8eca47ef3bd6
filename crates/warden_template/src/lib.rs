// SPDX-License-Identifier: Apache-2.0

//! The Template Canonicalizer (§4.3): converts versioned template sources
//! into the single internal [`warden_core::model::ConstraintTemplate`]
//! representation every driver and the client operate on.

pub mod canonicalize;
pub mod schema;
pub mod versioned;

pub use canonicalize::{canonicalize, to_versioned};
pub use versioned::{VersionedTarget, VersionedTemplate};
