//! TLS settings consumed by the dialer.
//!
//! `TlsConfig` is the caller-owned, immutable description of trust roots, server name
//! override, skip-verify flag and pass-through handshake parameters. Every dial builds a
//! fresh rustls `ClientConfig` from it, so the caller's settings are never mutated.

use super::verify::DeferredVerifier;
use crate::{Error, Result};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, ServerName};
use std::fs;
use std::sync::{Arc, OnceLock};

/// TLS configuration for dialing.
///
/// Provides a builder for creating TLS configurations with various certificate handling options.
/// By default, server certificates are validated against system root certificates.
///
/// # Examples
///
/// ```ignore
/// use tlsdial::connection::TlsConfig;
///
/// // With system root certificates (production)
/// let tls = TlsConfig::builder().build()?;
///
/// // With custom CA certificate and a fixed server name
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/path/to/ca.pem")
///     .server_name("www.example.org")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// Path the roots were loaded from, if any
    ca_cert_path: Option<String>,
    /// Explicit server name (None = infer from the dialed address)
    server_name: Option<String>,
    /// Skip all certificate verification
    insecure_skip_verify: bool,
    /// ALPN protocols offered in the handshake
    alpn_protocols: Vec<Vec<u8>>,
    /// Trust anchors for chain verification
    roots: Arc<RootCertStore>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Settings with an empty root store, for dials that never consult roots.
    pub(crate) fn without_roots() -> Self {
        Self {
            ca_cert_path: None,
            server_name: None,
            insecure_skip_verify: false,
            alpn_protocols: Vec::new(),
            roots: Arc::new(RootCertStore::empty()),
        }
    }

    /// Trust roots used for chain verification.
    pub fn roots(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }

    /// Explicit server name override, if set.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Check if certificate verification is disabled.
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// ALPN protocols offered during the handshake.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// Build the rustls client configuration for one dial.
    ///
    /// With `send_server_name` set and verification enabled, rustls performs WebPKI
    /// verification during the handshake. Otherwise SNI is suppressed (when
    /// `send_server_name` is false) and certificate acceptance is deferred to
    /// post-handshake verification.
    pub(crate) fn client_config(
        &self,
        provider: &Arc<CryptoProvider>,
        send_server_name: bool,
    ) -> Result<Arc<ClientConfig>> {
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {}", e)))?;

        let mut config = if send_server_name && !self.insecure_skip_verify {
            builder
                .with_root_certificates(self.roots.clone())
                .with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DeferredVerifier::new(provider.clone())))
                .with_no_client_auth()
        };

        config.enable_sni = send_server_name;
        config.alpn_protocols = self.alpn_protocols.clone();

        Ok(Arc::new(config))
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_cert_path", &self.ca_cert_path)
            .field("server_name", &self.server_name)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("alpn_protocols", &self.alpn_protocols.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Default)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<String>,
    ca_cert_pem: Option<Vec<u8>>,
    root_certificates: Vec<CertificateDer<'static>>,
    use_webpki_roots: bool,
    server_name: Option<String>,
    insecure_skip_verify: bool,
    alpn_protocols: Vec<Vec<u8>>,
}

impl TlsConfigBuilder {
    /// Set the path to a custom CA certificate file (PEM format).
    ///
    /// If no custom roots are configured, system root certificates will be used.
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Add CA certificates from in-memory PEM data.
    pub fn ca_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    /// Add DER-encoded trust anchors.
    pub fn root_certificates(
        mut self,
        certs: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Self {
        self.root_certificates.extend(certs);
        self
    }

    /// Use the bundled Mozilla root set instead of the system store.
    ///
    /// Ignored when custom roots are configured.
    pub fn use_webpki_roots(mut self, enable: bool) -> Self {
        self.use_webpki_roots = enable;
        self
    }

    /// Set an explicit server name.
    ///
    /// When unset, the server name is inferred from the host part of the dialed address.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// ⚠️ **DANGER**: Skip certificate verification.
    ///
    /// A pinned legacy certificate configured on the dial is still enforced.
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Set the ALPN protocols offered in the handshake.
    pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - CA certificate file cannot be read
    /// - CA certificate data is invalid PEM or contains no certificates
    /// - No root certificates could be loaded at all
    pub fn build(self) -> Result<TlsConfig> {
        let has_custom_roots = self.ca_cert_path.is_some()
            || self.ca_cert_pem.is_some()
            || !self.root_certificates.is_empty();

        let root_store = if has_custom_roots {
            self.load_custom_roots()?
        } else if self.use_webpki_roots {
            RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            }
        } else {
            load_native_roots()?
        };

        Ok(TlsConfig {
            ca_cert_path: self.ca_cert_path,
            server_name: self.server_name,
            insecure_skip_verify: self.insecure_skip_verify,
            alpn_protocols: self.alpn_protocols,
            roots: Arc::new(root_store),
        })
    }

    fn load_custom_roots(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        for cert in &self.root_certificates {
            root_store
                .add(cert.clone())
                .map_err(|e| Error::Config(format!("invalid root certificate: {}", e)))?;
        }

        if let Some(ca_path) = &self.ca_cert_path {
            let data = fs::read(ca_path).map_err(|e| {
                Error::Config(format!(
                    "Failed to read CA certificate file '{}': {}",
                    ca_path, e
                ))
            })?;
            load_pem_roots(&mut root_store, &data, ca_path)?;
        }

        if let Some(pem) = &self.ca_cert_pem {
            load_pem_roots(&mut root_store, pem, "<inline PEM>")?;
        }

        Ok(root_store)
    }
}

/// System root certificates via rustls-native-certs.
fn load_native_roots() -> Result<RootCertStore> {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(result.certs);
    tracing::debug!(added, ignored, "loaded system root certificates");

    if store.is_empty() {
        return Err(Error::Config(
            "Failed to load any system root certificates".to_string(),
        ));
    }

    Ok(store)
}

static SYSTEM_ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();

/// Default settings over the system roots, for dials given no `TlsConfig`.
///
/// The store is read from disk once per process, on the blocking pool.
pub(crate) async fn system_default() -> Result<TlsConfig> {
    let roots = match SYSTEM_ROOTS.get() {
        Some(roots) => roots.clone(),
        None => {
            let loaded = tokio::task::spawn_blocking(load_native_roots)
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            SYSTEM_ROOTS.get_or_init(|| Arc::new(loaded)).clone()
        }
    };

    Ok(TlsConfig {
        roots,
        ..TlsConfig::without_roots()
    })
}

/// Add every certificate found in `data` to `store`.
fn load_pem_roots(store: &mut RootCertStore, data: &[u8], origin: &str) -> Result<()> {
    let mut reader = std::io::Cursor::new(data);
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let (added, _) = store.add_parsable_certificates(std::iter::once(cert));
                found_certs += added;
            }
            Ok(Some(_)) => {
                // Skip non-certificate items (private keys, etc.)
            }
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "Failed to parse CA certificate from '{}'",
                    origin
                )));
            }
        }
    }

    if found_certs == 0 {
        return Err(Error::Config(format!(
            "No valid certificates found in '{}'",
            origin
        )));
    }

    Ok(())
}

/// Host portion of a dial address: everything before the last colon.
///
/// An address without a colon is returned whole. IPv6 literals keep their brackets
/// (`[::1]:443` yields `[::1]`).
pub fn split_host(addr: &str) -> &str {
    match addr.rfind(':') {
        Some(pos) => &addr[..pos],
        None => addr,
    }
}

/// Server name for a dial: the configured override, else the host of `addr`.
pub fn derive_server_name(tls_config: Option<&TlsConfig>, addr: &str) -> String {
    match tls_config.and_then(TlsConfig::server_name) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => split_host(addr).to_string(),
    }
}

/// Parse a server name for rustls.
///
/// Accepts DNS names (a trailing dot is removed) and IP literals, bracketed or not.
pub fn parse_server_name(name: &str) -> Result<ServerName<'static>> {
    let name = name.trim_end_matches('.');
    let name = name
        .strip_prefix('[')
        .and_then(|n| n.strip_suffix(']'))
        .unwrap_or(name);

    if name.is_empty() || name.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid server name for TLS: '{}'",
            name
        )));
    }

    ServerName::try_from(name.to_string())
        .map_err(|_| Error::Config(format!("Invalid server name for TLS: '{}'", name)))
}
