// SPDX-License-Identifier: Apache-2.0

//! The external-data subsystem (§4.7): a validated provider registry plus a
//! fingerprint-reusing HTTPS client cache, together implementing
//! [`warden_driver::ExternalDataResolver`] for the Logic and CEL drivers.

pub mod client;
pub mod provider;
mod tls;
pub mod wire;

pub use client::{ClientCache, ExternalDataClient};
pub use provider::ProviderCache;
pub use tls::ClientCertificate;
pub use warden_core::model::Provider;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the provider registry and HTTP client cache.
#[derive(Debug, Clone, Error, Diagnostic, Serialize)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// A provider spec failed upsert validation (§4.7).
    #[error("invalid provider '{name}': {reason}")]
    InvalidProvider {
        /// The provider's name.
        name: String,
        /// Why validation failed.
        reason: String,
    },
}
