// SPDX-License-Identifier: Apache-2.0

//! Warden: a constraint-evaluation framework decoupling reviewable objects
//! (Target Handlers), policy engines (Drivers), and templated constraints
//! from one another behind a single [`Client`] facade.
//!
//! This crate wires the framework's pieces together from a [`WardenConfig`]
//! (typically discovered via `.warden.toml`); the individual subsystems
//! (`warden_core`, `warden_target`, `warden_template`, `warden_driver_rego`,
//! `warden_driver_cel`, `warden_externdata`) can also be composed directly by
//! callers who need a non-default wiring.

pub use warden_client::{Client, Response, Responses, ReviewOptions};
pub use warden_common::config::{discover, discover_and_load, load, ConfigError, ProviderConfig, WardenConfig};
pub use warden_core::error::Error;
pub use warden_core::model::Provider;
pub use warden_externdata::{ClientCache, ClientCertificate, ExternalDataClient, ProviderCache};
pub use warden_template::canonicalize::{canonicalize, to_versioned};
pub use warden_template::versioned::VersionedTemplate;

use std::sync::Arc;
use warden_driver::Driver as DriverTrait;
use warden_driver_cel::CelDriver;
use warden_driver_rego::RegoDriver;
use warden_target::admission::AdmissionTargetHandler;
use warden_target::handler::TargetHandler;
use warden_target::registry::TargetRegistry;

/// The reference driver name recognized in [`WardenConfig::drivers`] for the
/// Rego-backed [`RegoDriver`].
pub const DRIVER_REGO: &str = "rego";
/// The reference driver name recognized in [`WardenConfig::drivers`] for the
/// CEL-backed [`CelDriver`].
pub const DRIVER_CEL: &str = "cel";

/// Everything [`bootstrap`] assembles: the ready-to-use [`Client`] plus the
/// provider/client caches backing its external-data resolution, which a
/// caller administers independently (seeding providers, rotating client
/// certificates) over the client's lifetime.
pub struct Warden {
    /// The assembled client.
    pub client: Client,
    /// The provider registry backing external-data lookups.
    pub providers: Arc<ProviderCache>,
    /// The HTTP client cache backing external-data lookups.
    pub clients: Arc<ClientCache>,
}

/// Assembles a [`Client`] from `config`: one reference target handler per
/// entry in [`WardenConfig::targets`] (all `admission`-style, per §4.2's
/// single reference implementation), one driver per entry in
/// [`WardenConfig::drivers`] (`"rego"` or `"cel"`), and a seeded
/// [`ProviderCache`] wired into the Rego driver's external-data resolver.
///
/// # Errors
///
/// Returns [`Error::CreatingDriver`] for an unrecognized driver name, a
/// duplicate driver name, or a duplicate target name; returns
/// [`warden_externdata::Error`] wrapped via [`Error::CreatingDriver`] if a
/// seeded provider fails validation.
pub fn bootstrap(config: &WardenConfig) -> Result<Warden, Error> {
    let clients = Arc::new(ClientCache::new());
    let providers = Arc::new(ProviderCache::new(Arc::clone(&clients)));
    for provider in &config.providers {
        providers
            .upsert(Provider {
                name: provider.name.clone(),
                url: provider.url.clone(),
                timeout_seconds: provider.timeout_seconds,
                ca_bundle: provider.ca_bundle.clone(),
                insecure_tls_skip_verify: provider.insecure_tls_skip_verify,
            })
            .map_err(|e| Error::CreatingDriver { driver: provider.name.clone(), reason: e.to_string() })?;
    }

    let mut handlers: Vec<Arc<dyn TargetHandler>> = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        handlers.push(Arc::new(AdmissionTargetHandler::new(target.clone())));
    }
    let registry = TargetRegistry::new(handlers)
        .map_err(|e| Error::CreatingDriver { driver: "target registry".to_owned(), reason: e.to_string() })?;

    let mut drivers: Vec<Arc<dyn DriverTrait>> = Vec::with_capacity(config.drivers.len());
    for name in &config.drivers {
        match name.as_str() {
            DRIVER_REGO => {
                let driver = RegoDriver::new(Vec::new());
                driver.set_external_data_resolver(Arc::new(ExternalDataClient::new(Arc::clone(&providers), Arc::clone(&clients))));
                drivers.push(Arc::new(driver));
            }
            DRIVER_CEL => drivers.push(Arc::new(CelDriver::new(false))),
            other => {
                return Err(Error::CreatingDriver { driver: other.to_owned(), reason: "unrecognized driver name (expected 'rego' or 'cel')".to_owned() })
            }
        }
    }

    let client = Client::new(registry, drivers)?;
    Ok(Warden { client, providers, clients })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_wires_configured_drivers_and_targets() {
        let config = WardenConfig {
            drivers: vec!["rego".to_owned(), "cel".to_owned()],
            targets: vec!["admission.k8s.example.sh".to_owned()],
            providers: Vec::new(),
            default_enforcement_action: None,
        };
        let warden = bootstrap(&config).expect("bootstrap succeeds");
        let opts = ReviewOptions::default();
        let responses = warden.client.review(&serde_json::json!({}), &opts);
        assert_eq!(responses.handled_count(), 0);
    }

    #[test]
    fn bootstrap_rejects_an_unrecognized_driver_name() {
        let config = WardenConfig {
            drivers: vec!["wasm".to_owned()],
            targets: Vec::new(),
            providers: Vec::new(),
            default_enforcement_action: None,
        };
        assert!(bootstrap(&config).is_err());
    }

    #[test]
    fn bootstrap_seeds_the_provider_cache() {
        let config = WardenConfig {
            drivers: Vec::new(),
            targets: Vec::new(),
            providers: vec![ProviderConfig {
                name: "vault".to_owned(),
                url: "https://vault.internal".to_owned(),
                timeout_seconds: 3,
                ca_bundle: String::new(),
                insecure_tls_skip_verify: true,
            }],
            default_enforcement_action: None,
        };
        let warden = bootstrap(&config).expect("bootstrap succeeds");
        assert!(warden.providers.get("vault").is_some());
    }
}
