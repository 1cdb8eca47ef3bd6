// SPDX-License-Identifier: Apache-2.0

//! Enforcement-Action Resolver (§4.4, resolution half) and the [`Matcher`]
//! trait a Target Handler's `ToMatcher` produces (§4.2, §4.4).

use crate::error::Error;
use crate::model::{
    is_wildcard_point, Constraint, EnforcementAction, EnforcementActionModel, EnforcementPoint,
    Review,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A closure, produced per-constraint by a Target Handler, deciding whether
/// a constraint applies to a given review.
///
/// A cache-miss (surfaced as [`Error::NotFound`]) is not a matcher failure;
/// the Client treats it as a non-match (§4.4).
pub trait Matcher: Send + Sync {
    /// Evaluates the matcher against `review`.
    fn matches(&self, review: &Review) -> Result<bool, Error>;
}

/// A type-erased, cheaply cloneable matcher handle.
pub type BoxedMatcher = Arc<dyn Matcher>;

impl<F> Matcher for F
where
    F: Fn(&Review) -> Result<bool, Error> + Send + Sync,
{
    fn matches(&self, review: &Review) -> Result<bool, Error> {
        self(review)
    }
}

/// Resolves the enforcement actions a constraint contributes to each of the
/// caller-requested enforcement points, per §4.4.
///
/// The returned list preserves the caller's requested-point order; actions
/// within each point are deduplicated and sorted lexicographically.
#[must_use]
pub fn resolve_enforcement_actions(
    constraint: &Constraint,
    requested_points: &[EnforcementPoint],
) -> Vec<(EnforcementPoint, Vec<EnforcementAction>)> {
    match &constraint.enforcement_action {
        EnforcementActionModel::Single(action) => requested_points
            .iter()
            .map(|point| (point.clone(), vec![action.clone()]))
            .collect(),
        EnforcementActionModel::Scoped(entries) => {
            let mut per_point: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
            for entry in entries {
                if entry.enforcement_points.is_empty() {
                    continue;
                }
                let applies_everywhere = entry.enforcement_points.iter().any(|p| is_wildcard_point(p));
                for point in requested_points {
                    let matches_explicitly = entry
                        .enforcement_points
                        .iter()
                        .any(|configured| configured == point);
                    if applies_everywhere || matches_explicitly {
                        let _ = per_point.entry(point).or_default().insert(&entry.action);
                    }
                }
            }
            requested_points
                .iter()
                .map(|point| {
                    let actions = per_point
                        .remove(point.as_str())
                        .map(|set| set.into_iter().map(str::to_owned).collect())
                        .unwrap_or_default();
                    (point.clone(), actions)
                })
                .collect()
        }
    }
}
