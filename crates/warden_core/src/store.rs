// SPDX-License-Identifier: Apache-2.0

//! A small transactional, in-memory key-value store keyed by [`StoragePath`].
//!
//! Used by the logic driver (§4.5) to hold constraint parameters and
//! referential data under the path layout the Client reserves (§4.1). The
//! store owns its own locking; callers never hold its lock across a
//! separate I/O boundary (§5).

use crate::error::Error;
use crate::path::StoragePath;
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// A transactional, namespaced document store.
///
/// All values live under one root JSON object; a [`StoragePath`]'s segments
/// address successively nested object keys.
#[derive(Default)]
pub struct Store {
    root: RwLock<Value>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Writes `value` at `path`, auto-creating intermediate objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathInvalid`] for the root path, or [`Error::Write`]
    /// if an ancestor segment already holds a non-object value.
    pub fn write(&self, path: &StoragePath, value: Value) -> Result<(), Error> {
        if path.is_root() {
            return Err(Error::PathInvalid {
                path: path.to_string(),
            });
        }
        let mut root = self.root.write();
        let segments = path.segments();
        let mut cursor = &mut *root;
        for segment in &segments[..segments.len() - 1] {
            if !cursor.is_object() {
                return Err(Error::Write {
                    path: path.to_string(),
                    reason: "ancestor segment is not an object".to_owned(),
                });
            }
            cursor = cursor
                .as_object_mut()
                .expect("checked is_object above")
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !cursor.is_object() {
            return Err(Error::Write {
                path: path.to_string(),
                reason: "ancestor segment is not an object".to_owned(),
            });
        }
        let leaf = segments.last().expect("non-root path has a last segment").clone();
        let _ = cursor
            .as_object_mut()
            .expect("checked is_object above")
            .insert(leaf, value);
        Ok(())
    }

    /// Reads the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no value exists at `path`.
    pub fn read(&self, path: &StoragePath) -> Result<Value, Error> {
        let root = self.root.read();
        let mut cursor = &*root;
        for segment in path.segments() {
            match cursor.get(segment) {
                Some(next) => cursor = next,
                None => {
                    return Err(Error::NotFound {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok(cursor.clone())
    }

    /// Removes the value at `path`. A no-op (not an error) when absent.
    pub fn remove(&self, path: &StoragePath) {
        if path.is_root() {
            return;
        }
        let mut root = self.root.write();
        let segments = path.segments();
        let mut cursor = &mut *root;
        for segment in &segments[..segments.len() - 1] {
            match cursor.get_mut(segment) {
                Some(next) => cursor = next,
                None => return,
            }
        }
        if let Some(obj) = cursor.as_object_mut() {
            let _ = obj.remove(segments.last().expect("non-root path"));
        }
    }

    /// Removes every entry whose path starts with `prefix`. Used when a
    /// template is removed, to drop all of its constraints' parameters at
    /// once (§3 Lifecycle: "removal is atomic").
    pub fn remove_prefix(&self, prefix: &StoragePath) {
        self.remove(prefix);
    }

    /// Runs `f` with exclusive access to the store, for operations that must
    /// observe (and possibly mutate) more than one path atomically.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Value) -> T) -> T {
        let mut root = self.root.write();
        f(&mut root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_root_is_rejected() {
        let store = Store::new();
        let err = store.write(&StoragePath::root(), json!(1)).unwrap_err();
        assert!(matches!(err, Error::PathInvalid { .. }));
    }

    #[test]
    fn write_auto_creates_intermediate_objects() {
        let store = Store::new();
        let path = StoragePath::constraint_params("K8sRequiredLabels", "ns-must-have-team");
        store.write(&path, json!({"labels": ["team"]})).unwrap();
        assert_eq!(store.read(&path).unwrap(), json!({"labels": ["team"]}));
    }

    #[test]
    fn write_through_non_object_ancestor_fails() {
        let store = Store::new();
        let leaf = StoragePath::from_segments(["a"]);
        store.write(&leaf, json!(42)).unwrap();
        let nested = StoragePath::from_segments(["a", "b"]);
        let err = store.write(&nested, json!(1)).unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = Store::new();
        let err = store.read(&StoragePath::from_segments(["missing"])).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = Store::new();
        let path = StoragePath::from_segments(["a", "b"]);
        store.write(&path, json!(1)).unwrap();
        store.remove(&path);
        store.remove(&path);
        assert!(store.read(&path).is_err());
    }

    #[test]
    fn remove_prefix_drops_whole_subtree() {
        let store = Store::new();
        let kind_root = StoragePath::from_segments(["constraints", "K8sRequiredLabels"]);
        let a = kind_root.extend("a");
        let b = kind_root.extend("b");
        store.write(&a, json!({})).unwrap();
        store.write(&b, json!({})).unwrap();
        store.remove_prefix(&kind_root);
        assert!(store.read(&a).is_err());
        assert!(store.read(&b).is_err());
    }
}
