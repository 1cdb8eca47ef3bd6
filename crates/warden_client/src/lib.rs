// SPDX-License-Identifier: Apache-2.0

//! The Client facade (§4.8) and Result Aggregator (§4.9): the single
//! referentially-consistent entry point tying the Target Handler registry,
//! the Driver registry, and the Template/Constraint registries together.

mod client;
mod responses;
mod state;

pub use client::{Client, ReviewOptions};
pub use responses::{Response, Responses};
