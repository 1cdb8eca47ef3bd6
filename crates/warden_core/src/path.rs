// SPDX-License-Identifier: Apache-2.0

//! Storage Path & Key model (§4.1): an ordered, hierarchical key used to
//! address constraint parameters, referential data, and handler-scoped
//! review context inside the in-memory store.

use std::fmt;

/// An ordered sequence of string segments forming a hierarchical key.
///
/// Equality is segment-wise. The rendered form uses `/` as delimiter. An
/// empty path is a valid *value* (the root) but is rejected as a *write
/// target* by the store (`ErrPathInvalid`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StoragePath(Vec<String>);

impl StoragePath {
    /// The empty (root) path.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from an iterator of segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn extend(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns a new path with `segments` appended in order.
    #[must_use]
    pub fn extend_all<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = self.0.clone();
        out.extend(segments.into_iter().map(Into::into));
        Self(out)
    }

    /// Drops the last segment, returning the parent path.
    ///
    /// # Panics
    ///
    /// Panics if called on the root (empty) path; callers must check
    /// [`StoragePath::is_root`] first, per §4.1 ("undefined on empty").
    #[must_use]
    pub fn parent(&self) -> Self {
        assert!(!self.0.is_empty(), "parent() is undefined on the root path");
        Self(self.0[..self.0.len() - 1].to_vec())
    }

    /// True for the root (empty) path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path's segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when `self` is `other` or a descendant of `other`.
    #[must_use]
    pub fn starts_with(&self, other: &StoragePath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// The constraint-parameter key for a given kind/name pair:
    /// `/constraints/<kind>/<name>`.
    #[must_use]
    pub fn constraint_params(kind: &str, name: &str) -> Self {
        Self::from_segments(["constraints", kind, name])
    }

    /// The root of the referential-data namespace: `/external/...`.
    #[must_use]
    pub fn external_data_root() -> Self {
        Self::from_segments(["external"])
    }

    /// The root namespace reserved for a given target handler:
    /// `/<handler-domain>/...`.
    #[must_use]
    pub fn handler_root(handler_domain: &str) -> Self {
        Self::from_segments([handler_domain])
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_uses_slash_delimiter() {
        let p = StoragePath::from_segments(["constraints", "Foo", "bar"]);
        assert_eq!(p.to_string(), "/constraints/Foo/bar");
    }

    #[test]
    fn equality_is_segment_wise() {
        let a = StoragePath::from_segments(["a", "b"]);
        let b = StoragePath::from_segments(["a", "b"]);
        let c = StoragePath::from_segments(["a", "c"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parent_drops_last_segment() {
        let p = StoragePath::from_segments(["a", "b", "c"]);
        assert_eq!(p.parent(), StoragePath::from_segments(["a", "b"]));
    }

    #[test]
    #[should_panic(expected = "undefined on the root path")]
    fn parent_of_root_panics() {
        let _ = StoragePath::root().parent();
    }

    #[test]
    fn starts_with_checks_prefix() {
        let root = StoragePath::from_segments(["constraints"]);
        let child = StoragePath::from_segments(["constraints", "Foo", "bar"]);
        assert!(child.starts_with(&root));
        assert!(!root.starts_with(&child));
    }

    #[test]
    fn constraint_params_layout() {
        let p = StoragePath::constraint_params("K8sRequiredLabels", "ns-must-have-team");
        assert_eq!(p.to_string(), "/constraints/K8sRequiredLabels/ns-must-have-team");
    }
}
