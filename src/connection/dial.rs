//! Dial configuration and the dial-and-verify routine

use super::deadline::{race, Dialer};
use super::tls::{derive_server_name, parse_server_name, system_default, TlsConfig};
use super::transport::{EstablishedTransport, Network};
use super::verify::{verify_peer, Verification};
use crate::metrics::{counters, histograms, labels};
use crate::{Error, Result};
use rustls_pki_types::{CertificateDer, ServerName};
use sha2::Digest;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

/// Dial configuration
///
/// Describes how a single target is dialed: optional HTTP proxy, whether SNI is sent,
/// an optional pinned legacy certificate and the underlying TLS settings. Use
/// `DialConfig::builder()` to construct one.
#[derive(Debug, Clone, Default)]
pub struct DialConfig {
    http_proxy_address: Option<String>,
    send_server_name: bool,
    legacy_certificate: Option<CertificateDer<'static>>,
    tls_config: Option<TlsConfig>,
    bind_to_device_service_address: Option<String>,
}

impl DialConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = DialConfig::builder()
    ///     .http_proxy_address("127.0.0.1:8080")
    ///     .send_server_name(false)
    ///     .legacy_certificate(pinned_der)
    ///     .build();
    /// ```
    pub fn builder() -> DialConfigBuilder {
        DialConfigBuilder::default()
    }

    /// HTTP proxy used for a CONNECT tunnel, if any
    pub fn http_proxy_address(&self) -> Option<&str> {
        self.http_proxy_address.as_deref()
    }

    /// Whether the server name is sent (SNI) and verified during the handshake
    pub fn send_server_name(&self) -> bool {
        self.send_server_name
    }

    /// Pinned certificate accepted by exact match
    pub fn legacy_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.legacy_certificate.as_ref()
    }

    /// Underlying TLS settings
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        self.tls_config.as_ref()
    }

    /// Device-binding service address
    pub fn bind_to_device_service_address(&self) -> Option<&str> {
        self.bind_to_device_service_address.as_deref()
    }

    fn insecure_skip_verify(&self) -> bool {
        self.tls_config
            .as_ref()
            .is_some_and(TlsConfig::insecure_skip_verify)
    }
}

/// Builder for `DialConfig`
#[derive(Debug, Clone, Default)]
pub struct DialConfigBuilder {
    http_proxy_address: Option<String>,
    send_server_name: bool,
    legacy_certificate: Option<CertificateDer<'static>>,
    tls_config: Option<TlsConfig>,
    bind_to_device_service_address: Option<String>,
}

impl DialConfigBuilder {
    /// Tunnel through an HTTP proxy at `addr` (`host:port`)
    pub fn http_proxy_address(mut self, addr: impl Into<String>) -> Self {
        self.http_proxy_address = Some(addr.into()).filter(|a: &String| !a.is_empty());
        self
    }

    /// Send SNI and rely on handshake verification (default: false)
    pub fn send_server_name(mut self, send: bool) -> Self {
        self.send_server_name = send;
        self
    }

    /// Accept only a server presenting exactly this leaf certificate
    pub fn legacy_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.legacy_certificate = Some(cert);
        self
    }

    /// Set the TLS settings
    pub fn tls_config(mut self, tls_config: TlsConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Request device binding for resolution
    pub fn bind_to_device_service_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_to_device_service_address = Some(addr.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> DialConfig {
        DialConfig {
            http_proxy_address: self.http_proxy_address,
            send_server_name: self.send_server_name,
            legacy_certificate: self.legacy_certificate,
            tls_config: self.tls_config,
            bind_to_device_service_address: self.bind_to_device_service_address,
        }
    }
}

/// TLS connection whose peer passed the configured verification
pub struct VerifiedConnection {
    stream: TlsStream<TcpStream>,
    peer_certificates: Vec<CertificateDer<'static>>,
    server_name: String,
    verification: Verification,
    proxy: Option<String>,
}

impl VerifiedConnection {
    /// Certificates presented by the peer, leaf first
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }

    /// Server name used for the handshake and verification
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Verification applied to this connection
    pub fn verification(&self) -> &Verification {
        &self.verification
    }

    /// HTTP proxy the connection is tunneled through, if any
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// SHA-256 of the DER-encoded leaf certificate
    pub fn peer_fingerprint(&self) -> Option<Vec<u8>> {
        let leaf = self.peer_certificates.first()?;
        Some(sha2::Sha256::digest(leaf.as_ref()).to_vec())
    }

    /// Negotiated ALPN protocol
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.get_ref().1.alpn_protocol()
    }

    /// Underlying TLS stream
    pub fn get_ref(&self) -> &TlsStream<TcpStream> {
        &self.stream
    }

    /// Consume the connection, returning the TLS stream
    pub fn into_inner(self) -> TlsStream<TcpStream> {
        self.stream
    }
}

impl std::fmt::Debug for VerifiedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedConnection")
            .field("server_name", &self.server_name)
            .field("verification", &self.verification.label())
            .field("proxy", &self.proxy)
            .field("peer_certificates", &self.peer_certificates.len())
            .finish()
    }
}

impl AsyncRead for VerifiedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for VerifiedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Dial `addr` with a default `Dialer` (no timeout).
pub async fn custom_tls_dial(
    network: Network,
    addr: &str,
    config: &DialConfig,
) -> Result<VerifiedConnection> {
    Dialer::default().dial(network, addr, config).await
}

impl Dialer {
    /// Establish a TLS connection to `addr` and verify the peer.
    ///
    /// The dialer's timeout and deadline bound transport connect, proxy tunnel and
    /// handshake together. `config` is only read; per-dial TLS state is built fresh.
    ///
    /// With `send_server_name` false, the handshake carries no SNI and certificates are
    /// verified afterwards, either against the pinned legacy certificate or by chain
    /// verification against the configured roots.
    pub async fn dial(
        &self,
        network: Network,
        addr: &str,
        config: &DialConfig,
    ) -> Result<VerifiedConnection> {
        let started = Instant::now();
        counters::dial_attempted();

        let result = self
            .dial_and_verify(network, addr, config)
            .instrument(tracing::info_span!(
                "dial",
                %network,
                addr = %addr,
                send_server_name = config.send_server_name()
            ))
            .await;

        let outcome = match &result {
            Ok(_) => labels::OUTCOME_SUCCESS,
            Err(e) => e.category(),
        };
        counters::dial_completed(outcome);
        histograms::dial_duration(outcome, started.elapsed().as_millis() as u64);

        result
    }

    async fn dial_and_verify(
        &self,
        network: Network,
        addr: &str,
        config: &DialConfig,
    ) -> Result<VerifiedConnection> {
        // Anchored before any setup so the deadline covers the whole sequence
        let deadline = self.effective_deadline();

        let send_server_name = config.send_server_name();
        let verification = Verification::select(
            config.legacy_certificate(),
            send_server_name,
            config.insecure_skip_verify(),
        );
        let needs_roots = send_server_name || verification == Verification::Chain;
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let establish = {
            let addr = addr.to_string();
            let config = config.clone();
            let nodelay = self.nodelay;
            let provider = provider.clone();
            async move {
                let tls_config = match config.tls_config() {
                    Some(tls) => tls.clone(),
                    None if needs_roots => system_default().await?,
                    None => TlsConfig::without_roots(),
                };

                let server_name = derive_server_name(Some(&tls_config), &addr);
                let tls_server_name = parse_server_name(&server_name)?;
                let connector =
                    TlsConnector::from(tls_config.client_config(&provider, send_server_name)?);

                let transport =
                    EstablishedTransport::establish(network, &addr, &config, nodelay).await?;
                let proxy = transport.proxy().map(str::to_string);
                let stream = connector
                    .connect(tls_server_name.clone(), transport.into_stream())
                    .await
                    .map_err(Error::Handshake)?;
                tracing::debug!("tls handshake complete");

                Ok(Handshaken {
                    stream,
                    tls_config,
                    server_name,
                    tls_server_name,
                    proxy,
                })
            }
            .in_current_span()
        };

        let Handshaken {
            stream,
            tls_config,
            server_name,
            tls_server_name,
            proxy,
        } = race(deadline, establish).await?;

        let peer_certificates = stream
            .get_ref()
            .1
            .peer_certificates()
            .map(<[CertificateDer<'static>]>::to_vec)
            .unwrap_or_default();

        let verified = verify_peer(
            &verification,
            &peer_certificates,
            &tls_server_name,
            tls_config.roots(),
            &provider,
        );
        if matches!(verification, Verification::Legacy(_) | Verification::Chain) {
            counters::verification(verification.label(), verified.is_ok());
        }
        if let Err(e) = verified {
            // Dropping the stream closes the transport before the error is returned
            drop(stream);
            return Err(e);
        }

        tracing::debug!(verification = verification.label(), "connection verified");

        Ok(VerifiedConnection {
            stream,
            peer_certificates,
            server_name,
            verification,
            proxy,
        })
    }
}

/// Outcome of the raced part of a dial.
struct Handshaken {
    stream: TlsStream<TcpStream>,
    tls_config: TlsConfig,
    server_name: String,
    tls_server_name: ServerName<'static>,
    proxy: Option<String>,
}
