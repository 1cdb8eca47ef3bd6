// SPDX-License-Identifier: Apache-2.0

//! An immutable registry of target handlers, built once at client
//! construction (§4.2: "Handlers are registered at client construction and
//! are immutable thereafter. Handler names must be unique; duplicates fail
//! construction.").

use crate::handler::TargetHandler;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure to build a [`TargetRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two or more handlers were registered under the same name.
    #[error("duplicate target handler name '{0}'")]
    DuplicateName(String),
}

/// An immutable collection of target handlers, keyed by name.
pub struct TargetRegistry {
    handlers: BTreeMap<String, Arc<dyn TargetHandler>>,
}

impl TargetRegistry {
    /// Builds a registry from a list of handlers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if two handlers share a name.
    pub fn new(handlers: Vec<Arc<dyn TargetHandler>>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for handler in handlers {
            let name = handler.name().to_owned();
            if map.insert(name.clone(), handler).is_some() {
                return Err(RegistryError::DuplicateName(name));
            }
        }
        Ok(Self { handlers: map })
    }

    /// Looks up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TargetHandler>> {
        self.handlers.get(name)
    }

    /// All registered handlers, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TargetHandler>> {
        self.handlers.values()
    }

    /// The number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionTargetHandler;

    #[test]
    fn duplicate_names_fail_construction() {
        let a: Arc<dyn TargetHandler> = Arc::new(AdmissionTargetHandler::new("admission.k8s.example.sh"));
        let b: Arc<dyn TargetHandler> = Arc::new(AdmissionTargetHandler::new("admission.k8s.example.sh"));
        let err = TargetRegistry::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "admission.k8s.example.sh"));
    }

    #[test]
    fn unique_names_succeed() {
        let a: Arc<dyn TargetHandler> = Arc::new(AdmissionTargetHandler::new("admission.k8s.example.sh"));
        let b: Arc<dyn TargetHandler> = Arc::new(AdmissionTargetHandler::new("audit.k8s.example.sh"));
        let registry = TargetRegistry::new(vec![a, b]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("admission.k8s.example.sh").is_some());
    }
}
