//! Post-handshake certificate verification.
//!
//! When the handshake ran without built-in verification, the peer chain is checked here by
//! one of two strategies: an exact match against a pinned legacy certificate, or a manual
//! WebPKI chain verification against the configured roots.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use thiserror::Error;

/// Certificate verification failure
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The server presented no certificate
    #[error("no certificate to verify")]
    NoCertificate,

    /// The leaf certificate differs from the pinned certificate
    #[error("unexpected certificate")]
    UnexpectedCertificate,

    /// Chain verification rejected the certificate
    #[error("{0}")]
    Chain(rustls::Error),
}

/// Verification applied to a dial, selected once from the dial configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Leaf must byte-match the pinned certificate
    Legacy(CertificateDer<'static>),
    /// Leaf is chain-verified against the trust roots after the handshake
    Chain,
    /// Verified during the handshake
    BuiltIn,
    /// Verification disabled by configuration
    Skipped,
}

impl Verification {
    /// Pick the verification for a dial.
    ///
    /// A pinned legacy certificate always wins; manual chain verification only applies
    /// when SNI was suppressed and verification was not disabled.
    pub fn select(
        legacy_certificate: Option<&CertificateDer<'static>>,
        send_server_name: bool,
        insecure_skip_verify: bool,
    ) -> Self {
        match (legacy_certificate, send_server_name, insecure_skip_verify) {
            (Some(cert), _, _) => Verification::Legacy(cert.clone()),
            (None, false, false) => Verification::Chain,
            (None, _, true) => Verification::Skipped,
            (None, true, false) => Verification::BuiltIn,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Verification::Legacy(_) => "legacy",
            Verification::Chain => "chain",
            Verification::BuiltIn => "builtin",
            Verification::Skipped => "skipped",
        }
    }
}

/// Run the post-handshake part of `verification` over the presented chain.
pub(crate) fn verify_peer(
    verification: &Verification,
    peer_certificates: &[CertificateDer<'static>],
    server_name: &ServerName<'_>,
    roots: Arc<RootCertStore>,
    provider: &Arc<CryptoProvider>,
) -> Result<(), crate::Error> {
    match verification {
        Verification::Legacy(expected) => {
            verify_legacy_certificate(peer_certificates, expected)?;
        }
        Verification::Chain => {
            verify_server_certs(peer_certificates, server_name, roots, provider)?;
        }
        Verification::BuiltIn | Verification::Skipped => {}
    }
    Ok(())
}

/// Decode a pinned legacy certificate.
///
/// Accepts base64-encoded DER (whitespace ignored) or a PEM `CERTIFICATE` block.
pub fn parse_legacy_certificate(encoded: &str) -> Result<CertificateDer<'static>, crate::Error> {
    let encoded = encoded.trim();

    let cert = if encoded.starts_with("-----BEGIN") {
        let mut reader = std::io::Cursor::new(encoded.as_bytes());
        let first = rustls_pemfile::certs(&mut reader).next();
        first
            .transpose()
            .map_err(|e| crate::Error::Config(format!("invalid legacy certificate PEM: {}", e)))?
            .ok_or_else(|| {
                crate::Error::Config("no certificate in legacy certificate PEM".into())
            })?
    } else {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD.decode(compact).map_err(|e| {
            crate::Error::Config(format!("invalid legacy certificate encoding: {}", e))
        })?;
        CertificateDer::from(der)
    };

    if cert.as_ref().is_empty() {
        return Err(crate::Error::Config("empty legacy certificate".into()));
    }
    Ok(cert)
}

/// Accept the peer only if its leaf certificate is byte-identical to `expected`.
///
/// No hostname, validity period or chain checks are made.
pub fn verify_legacy_certificate(
    peer_certificates: &[CertificateDer<'_>],
    expected: &CertificateDer<'_>,
) -> Result<(), VerifyError> {
    let leaf = peer_certificates.first().ok_or(VerifyError::NoCertificate)?;
    if leaf.as_ref() != expected.as_ref() {
        return Err(VerifyError::UnexpectedCertificate);
    }
    Ok(())
}

/// Verify the leaf against `roots` for `server_name` at the current time.
///
/// Every presented certificate after the leaf is offered as an intermediate.
pub fn verify_server_certs(
    peer_certificates: &[CertificateDer<'_>],
    server_name: &ServerName<'_>,
    roots: Arc<RootCertStore>,
    provider: &Arc<CryptoProvider>,
) -> Result<(), crate::Error> {
    let (leaf, intermediates) = peer_certificates
        .split_first()
        .ok_or(VerifyError::NoCertificate)?;

    let verifier = WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
        .build()
        .map_err(|e| crate::Error::Config(format!("cannot build chain verifier: {}", e)))?;

    verifier
        .verify_server_cert(leaf, intermediates, server_name, &[], UnixTime::now())
        .map_err(VerifyError::Chain)?;

    Ok(())
}

/// Handshake-time verifier that defers certificate acceptance.
///
/// Chain and name checks happen after the handshake; handshake signatures are still
/// verified so the peer must hold the key of the certificate it presented.
#[derive(Debug)]
pub(crate) struct DeferredVerifier {
    provider: Arc<CryptoProvider>,
}

impl DeferredVerifier {
    pub(crate) fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for DeferredVerifier {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
