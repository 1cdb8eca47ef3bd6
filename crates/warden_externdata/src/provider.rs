// SPDX-License-Identifier: Apache-2.0

//! The Provider Cache (§4.7): a validated name → provider mapping.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use std::sync::Arc;
use url::Url;
use warden_core::model::Provider;

use crate::client::ClientCache;
use crate::Error;

/// The fingerprint rule 1/2 compare to decide client reuse vs rebuild:
/// `(url, timeout, caBundle, insecureTlsSkipVerify)`. A client certificate
/// is supplied out-of-band (see [`ClientCache::set_client_certificate`]) and
/// never participates here — rotating it must not force a client rebuild.
pub(crate) fn fingerprint(provider: &Provider) -> (String, u32, String, bool) {
    (provider.url.clone(), provider.timeout_seconds, provider.ca_bundle.clone(), provider.insecure_tls_skip_verify)
}

pub(crate) fn validate(provider: &Provider) -> Result<(), Error> {
    if provider.name.trim().is_empty() {
        return Err(Error::InvalidProvider { name: provider.name.clone(), reason: "name must not be empty".to_owned() });
    }
    if provider.url.trim().is_empty() {
        return Err(Error::InvalidProvider { name: provider.name.clone(), reason: "url must not be empty".to_owned() });
    }
    let parsed = Url::parse(&provider.url)
        .map_err(|e| Error::InvalidProvider { name: provider.name.clone(), reason: format!("url is not parseable: {e}") })?;

    match parsed.scheme() {
        "https" => {}
        "http" if provider.insecure_tls_skip_verify => {}
        other => {
            return Err(Error::InvalidProvider {
                name: provider.name.clone(),
                reason: format!("scheme '{other}' requires https, or http with insecureTlsSkipVerify"),
            })
        }
    }

    if provider.insecure_tls_skip_verify {
        if !provider.ca_bundle.is_empty() {
            return Err(Error::InvalidProvider {
                name: provider.name.clone(),
                reason: "caBundle must be empty when insecureTlsSkipVerify is true".to_owned(),
            });
        }
        return Ok(());
    }

    if parsed.scheme() == "https" {
        if provider.ca_bundle.is_empty() {
            return Err(Error::InvalidProvider {
                name: provider.name.clone(),
                reason: "caBundle is required for https when insecureTlsSkipVerify is false".to_owned(),
            });
        }
        let decoded = STANDARD
            .decode(&provider.ca_bundle)
            .map_err(|e| Error::InvalidProvider { name: provider.name.clone(), reason: format!("caBundle is not valid base64: {e}") })?;
        let cert_count = rustls_pemfile::certs(&mut decoded.as_slice()).filter(Result::is_ok).count();
        if cert_count == 0 {
            return Err(Error::InvalidProvider {
                name: provider.name.clone(),
                reason: "caBundle decodes but contains no PEM certificates".to_owned(),
            });
        }
    }
    Ok(())
}

/// The process-wide provider registry. Holds a reference to the
/// [`ClientCache`] it must invalidate on `remove` (the global-state coupling
/// the design calls out explicitly rather than leaving invisible).
pub struct ProviderCache {
    providers: DashMap<String, Provider>,
    clients: Arc<ClientCache>,
}

impl ProviderCache {
    /// Creates an empty cache bound to `clients`.
    #[must_use]
    pub fn new(clients: Arc<ClientCache>) -> Self {
        Self { providers: DashMap::new(), clients }
    }

    /// Validates and installs (or replaces) `provider`.
    pub fn upsert(&self, provider: Provider) -> Result<(), Error> {
        validate(&provider)?;
        let _ = self.providers.insert(provider.name.clone(), provider);
        Ok(())
    }

    /// Idempotently removes `name`, invalidating its cached HTTP client.
    pub fn remove(&self, name: &str) {
        let _ = self.providers.remove(name);
        self.clients.invalidate(name);
    }

    /// Returns a deep copy of `name`'s provider spec, if installed.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Provider> {
        self.providers.get(name).map(|entry| entry.value().clone())
    }
}
