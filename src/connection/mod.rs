//! Connection establishment
//!
//! This module handles:
//! * Dial deadline computation and the timeout race
//! * Transport establishment (direct TCP or HTTP CONNECT tunnel)
//! * TLS configuration and the handshake with or without SNI
//! * Post-handshake certificate verification

mod deadline;
mod dial;
mod proxy;
pub mod resolver;
mod tls;
mod transport;
mod verify;

pub use deadline::Dialer;
pub use dial::{custom_tls_dial, DialConfig, DialConfigBuilder, VerifiedConnection};
pub use proxy::{check_response, encode_connect_request, TunnelError, EXPECTED_RESPONSE};
pub use tls::{derive_server_name, parse_server_name, split_host, TlsConfig, TlsConfigBuilder};
pub use transport::{connect_tcp, split_host_port, EstablishedTransport, Network};
pub use verify::{
    parse_legacy_certificate, verify_legacy_certificate, verify_server_certs, Verification,
    VerifyError,
};
