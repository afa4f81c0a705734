//! Error types for tlsdial

use crate::connection::{TunnelError, VerifyError};
use std::io;
use thiserror::Error;

/// Main error type for dial operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level I/O error (TCP connect, resolution)
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Invalid dial or TLS configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The effective deadline elapsed before the connection was established
    #[error("tls: dial timed out")]
    Timeout,

    /// HTTP CONNECT tunnel could not be established
    #[error("proxy tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    /// TLS handshake failed (includes built-in certificate verification)
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Post-handshake certificate verification failed
    #[error("certificate verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Requested feature is not available on this platform
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error was caused by the dial deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether retrying the same dial may succeed.
    ///
    /// Only timeouts are considered temporary; every other failure is
    /// deterministic for a given server and configuration.
    pub fn is_temporary(&self) -> bool {
        self.is_timeout()
    }

    /// Short label for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "transport",
            Error::Config(_) => "config",
            Error::Timeout => "timeout",
            Error::Tunnel(_) => "tunnel",
            Error::Handshake(_) => "handshake",
            Error::Verify(_) => "verify",
            Error::Unsupported(_) => "unsupported",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
