// SPDX-License-Identifier: Apache-2.0

//! Shared error-aggregation helpers used by every `warden_*` crate.

use std::error::Error;

/// A trait implemented by a crate's top-level error enum so that a list of
/// errors accumulated while processing a batch (policies, constraints,
/// targets, ...) can be folded into a single error of the same type.
pub trait WardenError: Error + Sized {
    /// Builds a single compound error from a non-empty list of errors.
    /// Implementations should flatten nested compound errors so repeated
    /// folding never nests arbitrarily deep.
    fn compound(errors: Vec<Self>) -> Self;
}

/// Folds a list of errors into `Ok(())` when empty, or a single compound
/// error via [`WardenError::compound`] otherwise.
pub fn handle_errors<E: WardenError>(errors: Vec<E>) -> Result<(), E> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(E::compound(errors))
    }
}

/// Renders a list of errors as a double-newline separated block, used by
/// compound error `Display` implementations.
pub fn format_errors<E: Error>(errors: &[E]) -> String {
    errors
        .iter()
        .map(std::string::ToString::to_string)
        .collect::<Vec<String>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("leaf: {0}")]
        Leaf(String),
        #[error("{}", format_errors(.0))]
        Compound(Vec<TestError>),
    }

    impl WardenError for TestError {
        fn compound(errors: Vec<Self>) -> Self {
            TestError::Compound(
                errors
                    .into_iter()
                    .flat_map(|e| match e {
                        TestError::Compound(inner) => inner,
                        e => vec![e],
                    })
                    .collect(),
            )
        }
    }

    #[test]
    fn empty_list_is_ok() {
        assert!(handle_errors::<TestError>(vec![]).is_ok());
    }

    #[test]
    fn non_empty_list_folds_to_compound() {
        let err = handle_errors(vec![
            TestError::Leaf("a".to_owned()),
            TestError::Leaf("b".to_owned()),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "a\n\nb");
    }

    #[test]
    fn compound_flattens_nested_compounds() {
        let nested = TestError::compound(vec![
            TestError::Leaf("a".to_owned()),
            TestError::Compound(vec![TestError::Leaf("b".to_owned())]),
        ]);
        match nested {
            TestError::Compound(errors) => assert_eq!(errors.len(), 2),
            TestError::Leaf(_) => panic!("expected compound"),
        }
    }
}
