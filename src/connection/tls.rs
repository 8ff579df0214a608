//! TLS configuration for secure ClickHouse connections.
//!
//! ClickHouse serves TLS directly on its secure native port, so the handshake
//! happens right after the TCP connect. Certificate material arrives inline as
//! PEM text from the plugin configuration and is scoped to one producer.

use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::sync::Arc;

/// TLS configuration for secure connections.
///
/// # Examples
///
/// ```ignore
/// // System roots
/// let tls = TlsConfig::builder().build()?;
///
/// // Inline CA bundle and client identity
/// let tls = TlsConfig::builder()
///     .ca_pem(ca)
///     .client_identity_pem(cert_and_key)
///     .server_name("clickhouse.internal")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// SNI / verification name override
    server_name: Option<String>,
    /// Whether a custom CA bundle was supplied
    custom_ca: bool,
    /// Whether a client certificate is presented
    client_auth: bool,
    /// Whether server certificate verification is disabled
    danger_accept_invalid_certs: bool,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Name to present via SNI, if overridden
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Check if invalid certificates are accepted.
    pub fn danger_accept_invalid_certs(&self) -> bool {
        self.danger_accept_invalid_certs
    }

    /// Check if a client certificate is presented.
    pub fn client_auth(&self) -> bool {
        self.client_auth
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .field("custom_ca", &self.custom_ca)
            .field("client_auth", &self.client_auth)
            .field(
                "danger_accept_invalid_certs",
                &self.danger_accept_invalid_certs,
            )
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Default)]
pub struct TlsConfigBuilder {
    ca_pem: Option<String>,
    client_identity_pem: Option<String>,
    server_name: Option<String>,
    danger_accept_invalid_certs: bool,
}

impl TlsConfigBuilder {
    /// Trust the certificates in this PEM bundle instead of the system roots.
    pub fn ca_pem(mut self, pem: impl Into<String>) -> Self {
        self.ca_pem = Some(pem.into());
        self
    }

    /// Present a client certificate; the PEM holds the chain followed by its private key.
    pub fn client_identity_pem(mut self, pem: impl Into<String>) -> Self {
        self.client_identity_pem = Some(pem.into());
        self
    }

    /// Verify the server against this name instead of the connection host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// ⚠️ **DANGER**: Accept any server certificate.
    ///
    /// Mirrors the `skip_verify` connection string flag. The connection is
    /// encrypted but the server is not authenticated.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the CA bundle holds no certificate or is not valid PEM
    /// - the client identity lacks a certificate or a private key
    /// - no root certificates could be loaded
    pub fn build(self) -> Result<TlsConfig> {
        let builder = ClientConfig::builder();

        let builder = if self.danger_accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        } else {
            let roots = match &self.ca_pem {
                Some(pem) => load_ca_bundle(pem)?,
                None => system_roots()?,
            };
            builder.with_root_certificates(roots)
        };

        let client_config = match &self.client_identity_pem {
            Some(pem) => {
                let (chain, key) = load_identity(pem)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::Config(format!("unable to load tls_certificate_key: {}", e)))?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            server_name: self.server_name,
            custom_ca: self.ca_pem.is_some(),
            client_auth: self.client_identity_pem.is_some(),
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            client_config: Arc::new(client_config),
        })
    }
}

/// Parse every certificate in a PEM bundle into a root store.
fn load_ca_bundle(pem: &str) -> Result<RootCertStore> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let _ = root_store.add_parsable_certificates(std::iter::once(cert));
                found_certs += 1;
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(
                    "failed to append CA to client options".to_string(),
                ));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Config(
            "failed to append CA to client options".to_string(),
        ));
    }

    Ok(root_store)
}

/// System roots, falling back to the bundled Mozilla roots.
fn system_roots() -> Result<RootCertStore> {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    for cert in result.certs {
        let _ = store.add_parsable_certificates(std::iter::once(cert));
    }

    if store.is_empty() {
        if !result.errors.is_empty() {
            tracing::warn!(
                errors = result.errors.len(),
                "no usable system root certificates, using bundled roots"
            );
        }
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    if store.is_empty() {
        return Err(Error::Config(
            "failed to load any root certificates".to_string(),
        ));
    }

    Ok(store)
}

/// Split a combined PEM into its certificate chain and private key.
fn load_identity(
    pem: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let mut chain = Vec::new();
    let mut key = None;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => chain.push(cert),
            Ok(Some(Item::Pkcs1Key(k))) => key = Some(PrivateKeyDer::Pkcs1(k)),
            Ok(Some(Item::Pkcs8Key(k))) => key = Some(PrivateKeyDer::Pkcs8(k)),
            Ok(Some(Item::Sec1Key(k))) => key = Some(PrivateKeyDer::Sec1(k)),
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                return Err(Error::Config(format!(
                    "unable to load tls_certificate_key: {}",
                    e
                )))
            }
        }
    }

    if chain.is_empty() {
        return Err(Error::Config(
            "unable to load tls_certificate_key: no certificate found".to_string(),
        ));
    }
    let key = key.ok_or_else(|| {
        Error::Config("unable to load tls_certificate_key: no private key found".to_string())
    })?;

    Ok((chain, key))
}

/// Verifier that accepts any server certificate (`skip_verify=true`).
#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is invalid.
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>> {
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Config(format!("Invalid hostname for TLS: '{}'", hostname)))
}
