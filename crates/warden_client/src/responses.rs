// SPDX-License-Identifier: Apache-2.0

//! The Result Aggregator (§4.9): the per-target [`Response`]s a [`Client::review`](crate::Client::review)
//! call produces, and the flattened views over them.

use warden_common::diagnostic::DiagnosticMessages;
use warden_core::model::{EvaluationResult, TargetName};

/// One target handler's contribution to a [`Responses`].
pub struct Response {
    /// The target this response came from.
    pub target: TargetName,
    /// Results produced for this target, sorted by `(enforcement_action, msg)`.
    pub results: Vec<EvaluationResult>,
    /// Non-fatal diagnostics collected while evaluating this target (matcher
    /// errors other than cache-miss, driver query errors).
    pub diagnostics: DiagnosticMessages,
    /// The driver evaluation trace for this target, present only when
    /// tracing was requested and at least one driver produced one.
    pub trace: Option<String>,
}

/// The outcome of a [`Client::review`](crate::Client::review) call: one
/// [`Response`] per target that claimed the reviewed object.
#[derive(Default)]
pub struct Responses {
    responses: Vec<Response>,
}

impl Responses {
    pub(crate) fn new(responses: Vec<Response>) -> Self {
        Self { responses }
    }

    /// The flat list of results across every target, sorted deterministically
    /// by `(enforcement_action, msg)` (§4.8 step 4, §5).
    #[must_use]
    pub fn results(&self) -> Vec<&EvaluationResult> {
        let mut all: Vec<&EvaluationResult> = self.responses.iter().flat_map(|r| r.results.iter()).collect();
        all.sort_by(|a, b| (&a.enforcement_actions, &a.msg).cmp(&(&b.enforcement_actions, &b.msg)));
        all
    }

    /// The number of targets that claimed the reviewed object.
    #[must_use]
    pub fn handled_count(&self) -> usize {
        self.responses.len()
    }

    /// Per-target responses, in target-iteration order.
    #[must_use]
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// A diagnostic dump combining every target's evaluation trace, present
    /// only for targets where one was captured.
    #[must_use]
    pub fn trace_dump(&self) -> String {
        let mut out = String::new();
        for response in &self.responses {
            let Some(trace) = &response.trace else { continue };
            out.push_str(&format!("=== {} ===\n{trace}\n", response.target));
        }
        out
    }
}
