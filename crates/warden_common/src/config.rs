// SPDX-License-Identifier: Apache-2.0

//! Project-level configuration via `.warden.toml`.
//!
//! Discovery walks up from the current working directory to find the first
//! `.warden.toml` file, mirroring how Weaver discovers `.weaver.toml`.
//! Nothing in this file can bypass the Client's referential-consistency
//! invariants: it only seeds which drivers/targets/providers a caller wires
//! up, not constraint or template content.

use schemars::JsonSchema;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The filename to search for during discovery.
const CONFIG_FILENAME: &str = ".warden.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct WardenConfig {
    /// Names of the reference drivers to construct (`rego`, `cel`).
    pub drivers: Vec<String>,
    /// Names of the target handlers to register.
    pub targets: Vec<String>,
    /// External-data providers to seed the `ProviderCache` with at startup.
    pub providers: Vec<ProviderConfig>,
    /// Enforcement action used by front-ends when a constraint declares
    /// neither `enforcementAction` nor `scopedEnforcementActions`. This is a
    /// front-end convenience; the core never defaults it implicitly.
    pub default_enforcement_action: Option<String>,
}

/// A provider record as it appears in `.warden.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, JsonSchema)]
pub struct ProviderConfig {
    /// Provider name, unique within the `ProviderCache`.
    pub name: String,
    /// HTTPS (or HTTP, if `insecure_tls_skip_verify`) base URL.
    pub url: String,
    /// Request timeout, in seconds.
    #[serde(default)]
    pub timeout_seconds: u32,
    /// Base64-encoded PEM CA bundle.
    #[serde(default)]
    pub ca_bundle: String,
    /// Skip TLS verification. Mutually exclusive with a non-empty CA bundle.
    #[serde(default)]
    pub insecure_tls_skip_verify: bool,
}

/// Discover a `.warden.toml` file by walking up from the given directory.
///
/// Returns the path to the first `.warden.toml` found, or `None` if none
/// exists.
#[must_use]
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load a `.warden.toml` from the given path.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<WardenConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Discover and load a `.warden.toml` starting from the given directory.
///
/// Returns `None` if no config file is found.
///
/// # Errors
///
/// Returns an error if the discovered file cannot be read or parsed.
pub fn discover_and_load(start: &Path) -> Result<Option<WardenConfig>, ConfigError> {
    match discover(start) {
        Some(path) => {
            log::info!("Found config file: {}", path.display());
            load(&path).map(Some)
        }
        None => Ok(None),
    }
}

/// Errors from config loading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading the config file.
    #[error("Failed to read config '{}': {reason}", path.display())]
    Io {
        /// The path that failed to read.
        path: PathBuf,
        /// The error message.
        reason: String,
    },
    /// Parse error in the TOML config.
    #[error("Failed to parse config '{}': {reason}", path.display())]
    Parse {
        /// The path that failed to parse.
        path: PathBuf,
        /// The error message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_full_config() {
        let toml = r#"
drivers = ["rego", "cel"]
targets = ["admission.k8s.example.sh"]
default_enforcement_action = "deny"

[[providers]]
name = "vault"
url = "https://vault.internal:8443"
timeout_seconds = 3
ca_bundle = "YWJj"
"#;
        let config: WardenConfig = toml::from_str(toml).expect("valid toml");
        assert_eq!(config.drivers, vec!["rego", "cel"]);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "vault");
        assert_eq!(config.default_enforcement_action.as_deref(), Some("deny"));
    }

    #[test]
    fn parse_empty_config() {
        let config: WardenConfig = toml::from_str("").expect("empty toml is valid");
        assert!(config.drivers.is_empty());
        assert!(config.providers.is_empty());
    }

    #[test]
    fn discover_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).expect("mkdir -p");
        fs::write(dir.path().join(CONFIG_FILENAME), "drivers = [\"rego\"]").expect("write config");

        let found = discover(&nested);
        assert_eq!(found, Some(dir.path().join(CONFIG_FILENAME)));
    }

    #[test]
    fn discover_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(discover(dir.path()).is_none());
    }

    #[test]
    fn discover_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILENAME), "targets = [\"t\"]").expect("write config");
        let config = discover_and_load(dir.path())
            .expect("load ok")
            .expect("found");
        assert_eq!(config.targets, vec!["t"]);
    }
}
