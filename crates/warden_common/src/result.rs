// SPDX-License-Identifier: Apache-2.0

//! A result type supporting both non-fatal errors (NFEs) and fatal errors.
//!
//! NFEs do not prevent the rest of a batch operation from completing; they
//! are surfaced into a diagnostic channel instead of aborting the call. This
//! is the mechanism behind the per-target diagnostic channel in the review
//! path and the Template Canonicalizer's non-fatal schema warnings.

use crate::diagnostic::{DiagnosticMessage, DiagnosticMessages};
use crate::error::WardenError;
use miette::Diagnostic;
use serde::Serialize;
use std::error::Error;

/// A result carrying either a successful value plus zero or more non-fatal
/// errors, or a single fatal error.
#[must_use]
pub enum WResult<T, E> {
    /// The operation succeeded; any non-fatal errors collected along the way
    /// are returned alongside the value.
    Ok(T, Vec<E>),
    /// The operation failed outright.
    Err(E),
}

impl<T, E> WResult<T, E>
where
    E: WardenError + Diagnostic + Serialize + Send + Sync + 'static,
{
    /// Wraps a successful value with its accumulated non-fatal errors.
    pub fn with_non_fatal_errors(result: T, non_fatal_errors: Vec<E>) -> Self {
        WResult::Ok(result, non_fatal_errors)
    }

    /// Wraps a fatal error.
    pub fn with_fatal_error(error: E) -> Self {
        WResult::Err(error)
    }

    /// Converts into a standard [`Result`], capturing non-fatal errors into
    /// the provided diagnostic sink rather than discarding them.
    pub fn capture_non_fatal_errors(self, non_fatal_errors: &mut Vec<DiagnosticMessage>) -> Result<T, E> {
        match self {
            WResult::Ok(result, nfes) => {
                non_fatal_errors.extend(nfes.into_iter().map(DiagnosticMessage::new));
                Ok(result)
            }
            WResult::Err(fatal_err) => Err(fatal_err),
        }
    }

    /// Splits off warning-severity non-fatal errors into `diag_msgs`, leaving
    /// only genuine errors in the returned `WResult`.
    pub fn capture_warnings(self, diag_msgs: &mut DiagnosticMessages) -> WResult<T, E> {
        if let WResult::Ok(result, nfes) = self {
            let (warnings, errors): (Vec<_>, Vec<_>) = nfes
                .into_iter()
                .partition(|e| matches!(e.severity(), Some(miette::Severity::Warning)));
            diag_msgs.extend_from_vec(warnings.into_iter().map(DiagnosticMessage::new).collect());
            WResult::Ok(result, errors)
        } else {
            self
        }
    }

    /// Drops any warning-severity non-fatal errors entirely.
    pub fn ignore_warnings(self) -> WResult<T, E> {
        match self {
            WResult::Ok(result, non_fatal_errors) => {
                let errors = non_fatal_errors
                    .into_iter()
                    .filter(|e| !matches!(e.severity(), Some(miette::Severity::Warning)))
                    .collect();
                WResult::Ok(result, errors)
            }
            WResult::Err(e) => WResult::Err(e),
        }
    }

    /// Converts into a standard [`Result`], folding any non-fatal errors into
    /// a single compound fatal error via [`WardenError::compound`].
    pub fn into_result(self) -> Result<T, E> {
        match self {
            WResult::Ok(result, errors) => {
                if errors.is_empty() {
                    Ok(result)
                } else {
                    Err(E::compound(errors))
                }
            }
            WResult::Err(e) => Err(e),
        }
    }

    /// Converts into a standard [`Result`], returning the non-fatal errors
    /// alongside the value instead of folding them.
    pub fn into_result_with_nfes(self) -> Result<(T, Vec<E>), E> {
        match self {
            WResult::Ok(result, errors) => Ok((result, errors)),
            WResult::Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, thiserror::Error, Diagnostic, Serialize)]
    enum TestError {
        #[error("leaf: {0}")]
        Leaf(String),
        #[error("{}", crate::error::format_errors(.0))]
        Compound(Vec<TestError>),
    }

    impl WardenError for TestError {
        fn compound(errors: Vec<Self>) -> Self {
            TestError::Compound(errors)
        }
    }

    #[test]
    fn into_result_folds_non_fatal_errors() {
        let w: WResult<i32, TestError> =
            WResult::with_non_fatal_errors(1, vec![TestError::Leaf("oops".to_owned())]);
        assert!(w.into_result().is_err());
    }

    #[test]
    fn into_result_passes_through_clean_value() {
        let w: WResult<i32, TestError> = WResult::with_non_fatal_errors(1, vec![]);
        assert_eq!(w.into_result().unwrap(), 1);
    }

    #[test]
    fn with_nfes_preserves_non_fatal_list() {
        let w: WResult<i32, TestError> =
            WResult::with_non_fatal_errors(1, vec![TestError::Leaf("oops".to_owned())]);
        let (value, nfes) = w.into_result_with_nfes().unwrap();
        assert_eq!(value, 1);
        assert_eq!(nfes.len(), 1);
    }
}
