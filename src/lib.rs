//! tlsdial: TLS dialing for hostile networks and non-compliant servers.
//!
//! A dial opens TCP to the target (or to an HTTP proxy that tunnels to it with CONNECT),
//! runs a rustls handshake with SNI sent or suppressed, and verifies the server either by
//! standard chain verification or by exact match against a pinned legacy certificate. One
//! timeout bounds the whole sequence.
//!
//! ```no_run
//! # async fn example() -> tlsdial::Result<()> {
//! use std::time::Duration;
//! use tlsdial::{DialConfig, Dialer, Network, TlsConfig};
//!
//! let tls = TlsConfig::builder().ca_cert_path("/etc/tlsdial/ca.pem").build()?;
//! let config = DialConfig::builder()
//!     .send_server_name(false)
//!     .tls_config(tls)
//!     .build();
//!
//! let dialer = Dialer::new().timeout(Duration::from_secs(20));
//! let conn = dialer.dial(Network::Tcp, "203.0.113.7:443", &config).await?;
//! println!("verified by {}", conn.verification().label());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod metrics;

pub use connection::{
    custom_tls_dial, DialConfig, Dialer, Network, TlsConfig, VerifiedConnection, Verification,
};
pub use error::{Error, Result};
