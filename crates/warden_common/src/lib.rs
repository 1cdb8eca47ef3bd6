// SPDX-License-Identifier: Apache-2.0

//! Ambient stack shared by every `warden_*` crate: error aggregation,
//! diagnostics, the `WResult` non-fatal-error result type, and `.warden.toml`
//! configuration discovery. Nothing here is specific to any one engine or
//! target; drivers and the client build on top of it.

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod result;
