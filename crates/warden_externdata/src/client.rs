// SPDX-License-Identifier: Apache-2.0

//! The HTTP Client Cache (§4.7): one pooled `ureq` agent per provider,
//! reused across lookups while the provider's fingerprint is unchanged and
//! rebuilt when it changes. A client certificate is tracked separately from
//! the provider's connection spec so rotating it never triggers a rebuild.

use dashmap::DashMap;
use rustls::sign::CertifiedKey;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use warden_core::model::Provider;
use warden_driver::{ExternalDataItem, ExternalDataOutcome, ExternalDataResolver};

use crate::provider::{self, ProviderCache};
use crate::tls::{build_certified_key, build_client_config, build_insecure_client_config, ClientCertificate, RotatingClientCert};
use crate::wire::{ProviderRequest, ProviderResponse};
use crate::Error;

type Fingerprint = (String, u32, String, bool);

struct ClientEntry {
    agent: ureq::Agent,
    fingerprint: Fingerprint,
    cert_resolver: Arc<RotatingClientCert>,
}

/// Keyed by provider name; see module docs.
#[derive(Default)]
pub struct ClientCache {
    entries: DashMap<String, Arc<ClientEntry>>,
    certificates: DashMap<String, Arc<CertifiedKey>>,
}

impl ClientCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: DashMap::new(), certificates: DashMap::new() }
    }

    /// Closes idle connections on `name`'s transport and removes it, along
    /// with any client certificate registered for it. Safe to call for an
    /// unknown name.
    pub fn invalidate(&self, name: &str) {
        let _ = self.entries.remove(name);
        let _ = self.certificates.remove(name);
    }

    /// Validates and installs the client certificate presented for `name`.
    /// Takes effect on the next lookup without rebuilding the pooled agent
    /// (§4.7 rule 3) — the certificate never enters a provider's
    /// fingerprint.
    pub fn set_client_certificate(&self, name: &str, cert: &ClientCertificate) -> Result<(), Error> {
        let certified = build_certified_key(cert, name)?;
        let _ = self.certificates.insert(name.to_owned(), certified);
        Ok(())
    }

    /// Removes any client certificate registered for `name`; subsequent
    /// handshakes present none.
    pub fn clear_client_certificate(&self, name: &str) {
        let _ = self.certificates.remove(name);
    }

    fn get_or_build(&self, provider: &Provider) -> Result<Arc<ClientEntry>, Error> {
        let fingerprint = provider::fingerprint(provider);

        if let Some(entry) = self.entries.get(&provider.name) {
            if entry.fingerprint == fingerprint {
                self.rotate_certificate(&entry, &provider.name);
                return Ok(Arc::clone(&entry));
            }
        }

        // Fingerprint differs (or no entry exists). Dropping the old Arc
        // below (via `insert` replacing it) closes its idle connections
        // once the last in-flight reference is released.
        let resolver = Arc::new(RotatingClientCert::new());
        let agent = build_agent(provider, Arc::clone(&resolver))?;
        let entry = Arc::new(ClientEntry { agent, fingerprint, cert_resolver: resolver });
        self.rotate_certificate(&entry, &provider.name);
        self.entries.insert(provider.name.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    fn rotate_certificate(&self, entry: &ClientEntry, provider_name: &str) {
        let certified = self.certificates.get(provider_name).map(|c| Arc::clone(&c));
        entry.cert_resolver.store(certified);
    }
}

fn build_agent(provider: &Provider, resolver: Arc<RotatingClientCert>) -> Result<ureq::Agent, Error> {
    let mut builder = ureq::AgentBuilder::new().timeout(Duration::from_secs(u64::from(provider.timeout_seconds)));

    if provider.url.starts_with("https://") {
        let config = if provider.insecure_tls_skip_verify {
            build_insecure_client_config(resolver)
        } else {
            build_client_config(&provider.ca_bundle, &provider.name, resolver)?
        };
        builder = builder.tls_config(Arc::new(config));
    }

    Ok(builder.build())
}

/// Combines the [`ProviderCache`] and [`ClientCache`] into the
/// `ExternalDataResolver` drivers consume (§4.5 step 5).
pub struct ExternalDataClient {
    providers: Arc<ProviderCache>,
    clients: Arc<ClientCache>,
}

impl ExternalDataClient {
    /// Creates a resolver sharing `providers` and `clients` with whatever
    /// else administers the provider registry.
    #[must_use]
    pub fn new(providers: Arc<ProviderCache>, clients: Arc<ClientCache>) -> Self {
        Self { providers, clients }
    }

    fn call(&self, provider_name: &str, keys: &[Value]) -> Result<ProviderResponse, String> {
        let provider = self.providers.get(provider_name).ok_or_else(|| format!("unknown provider '{provider_name}'"))?;
        let entry = self.clients.get_or_build(&provider).map_err(|e| e.to_string())?;
        let request = ProviderRequest::new(keys.to_vec());

        let response = entry
            .agent
            .post(&provider.url)
            .set("Content-Type", "application/json")
            .send_json(serde_json::to_value(&request).map_err(|e| e.to_string())?)
            .map_err(|e| format!("request to provider '{provider_name}' failed: {e}"))?;

        response
            .into_json::<ProviderResponse>()
            .map_err(|e| format!("malformed response from provider '{provider_name}': {e}"))
    }
}

impl ExternalDataResolver for ExternalDataClient {
    fn lookup(&self, provider: &str, keys: &[Value]) -> ExternalDataOutcome {
        match self.call(provider, keys) {
            Ok(response) => {
                if let Some(system_error) = response.response.system_error {
                    return ExternalDataOutcome { items: Vec::new(), system_error: Some(system_error) };
                }
                let items = response
                    .response
                    .items
                    .into_iter()
                    .map(|item| ExternalDataItem { key: item.key, value: item.value, error: item.error })
                    .collect();
                ExternalDataOutcome { items, system_error: None }
            }
            Err(system_error) => ExternalDataOutcome { items: Vec::new(), system_error: Some(system_error) },
        }
    }
}
