// SPDX-License-Identifier: Apache-2.0

//! TLS configuration helpers for the HTTP Client Cache (§4.7): a root store
//! built from a decoded CA bundle, TLS 1.3 minimum, and an atomically
//! rotatable client certificate resolver.

use arc_swap::ArcSwapOption;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

use crate::Error;

/// A client certificate/key pair, base64-encoded PEM, rotated atomically
/// into a provider's HTTP client independently of its connection spec
/// (§4.7 rule 3) — see [`crate::ClientCache::set_client_certificate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    /// Base64-encoded PEM certificate chain.
    pub cert_pem_base64: String,
    /// Base64-encoded PEM private key.
    pub key_pem_base64: String,
}

/// Holds the currently active client certificate, if any, and hands it back
/// to `rustls` on every handshake. Swapping the inner pointer takes effect
/// immediately without rebuilding the `ClientConfig` (§4.7 rule 3).
#[derive(Debug, Default)]
pub(crate) struct RotatingClientCert(ArcSwapOption<CertifiedKey>);

impl RotatingClientCert {
    pub(crate) fn new() -> Self {
        Self(ArcSwapOption::empty())
    }

    pub(crate) fn store(&self, key: Option<Arc<CertifiedKey>>) {
        self.0.store(key);
    }
}

impl ResolvesClientCert for RotatingClientCert {
    fn resolve(&self, _root_hint_subjects: &[&[u8]], _sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        self.0.load_full()
    }

    fn has_certs(&self) -> bool {
        self.0.load().is_some()
    }
}

fn decode_pem_bundle(base64_pem: &str, field: &str, provider: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(base64_pem)
        .map_err(|e| Error::InvalidProvider { name: provider.to_owned(), reason: format!("{field} is not valid base64: {e}") })
}

fn build_root_store(ca_bundle_base64: &str, provider: &str) -> Result<RootCertStore, Error> {
    let decoded = decode_pem_bundle(ca_bundle_base64, "caBundle", provider)?;
    let mut store = RootCertStore::empty();
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut decoded.as_slice()).filter_map(Result::ok).collect();
    if certs.is_empty() {
        return Err(Error::InvalidProvider { name: provider.to_owned(), reason: "caBundle contains no PEM certificates".to_owned() });
    }
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| Error::InvalidProvider { name: provider.to_owned(), reason: format!("caBundle certificate rejected: {e}") })?;
    }
    Ok(store)
}

/// Builds the certified key presented during client-certificate auth.
pub(crate) fn build_certified_key(cert: &ClientCertificate, provider: &str) -> Result<Arc<CertifiedKey>, Error> {
    let cert_bytes = decode_pem_bundle(&cert.cert_pem_base64, "clientCertificate.cert", provider)?;
    let key_bytes = decode_pem_bundle(&cert.key_pem_base64, "clientCertificate.key", provider)?;

    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice()).filter_map(Result::ok).collect();
    if chain.is_empty() {
        return Err(Error::InvalidProvider { name: provider.to_owned(), reason: "clientCertificate.cert contains no PEM certificates".to_owned() });
    }
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|e| Error::InvalidProvider { name: provider.to_owned(), reason: format!("clientCertificate.key is not a valid private key: {e}") })?
        .ok_or_else(|| Error::InvalidProvider { name: provider.to_owned(), reason: "clientCertificate.key contains no private key".to_owned() })?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| Error::InvalidProvider { name: provider.to_owned(), reason: format!("unsupported client private key: {e}") })?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Builds a `rustls::ClientConfig` pinned to TLS 1.3 minimum, trusting only
/// the decoded CA bundle, and resolving its client certificate (if any)
/// through `resolver` on every handshake.
pub(crate) fn build_client_config(
    ca_bundle_base64: &str,
    provider: &str,
    resolver: Arc<RotatingClientCert>,
) -> Result<ClientConfig, Error> {
    let roots = build_root_store(ca_bundle_base64, provider)?;
    let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_root_certificates(roots)
        .with_client_cert_resolver(resolver);
    Ok(config)
}

/// A verifier that accepts any server certificate. Backs
/// `insecureSkipVerify`; never used unless a provider explicitly opts in.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

/// Builds a TLS 1.3-minimum `ClientConfig` that accepts any server
/// certificate (`insecureSkipVerify`), still rotating its client
/// certificate through `resolver` on every handshake.
pub(crate) fn build_insecure_client_config(resolver: Arc<RotatingClientCert>) -> ClientConfig {
    ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_client_cert_resolver(resolver)
}
