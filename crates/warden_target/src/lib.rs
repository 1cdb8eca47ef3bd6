// SPDX-License-Identifier: Apache-2.0

//! The Target Handler abstraction (§4.2): pluggable adapters between raw
//! objects/reviews and the framework core, plus a reference admission-style
//! handler and an immutable registry.

pub mod admission;
pub mod cache;
pub mod handler;
pub mod registry;
