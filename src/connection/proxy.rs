//! HTTP CONNECT tunnel establishment
//!
//! The proxy answer is checked byte-for-byte against a single expected response; no status
//! variants or response headers are understood.

use super::tls::split_host;
use bytes::{BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The only proxy response accepted as a successful tunnel.
pub const EXPECTED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// HTTP CONNECT failure
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Writing the CONNECT request failed
    #[error("failed to send CONNECT request: {0}")]
    Write(#[source] io::Error),

    /// Reading the proxy response failed or ended early
    #[error("failed to read CONNECT response: {0}")]
    Read(#[source] io::Error),

    /// The proxy answered with something other than the expected response
    #[error("unexpected HTTP proxy response: {0}")]
    UnexpectedResponse(String),
}

/// Encode the CONNECT request for `addr` (`host:port`).
pub fn encode_connect_request(addr: &str) -> BytesMut {
    let host = split_host(addr);
    let mut buf = BytesMut::with_capacity(64 + addr.len() + host.len());
    buf.put(&b"CONNECT "[..]);
    buf.put(addr.as_bytes());
    buf.put(&b" HTTP/1.1\r\nHost: "[..]);
    buf.put(host.as_bytes());
    buf.put(&b"\r\nConnection: Keep-Alive\r\n\r\n"[..]);
    buf
}

/// Check a proxy response against [`EXPECTED_RESPONSE`].
pub fn check_response(response: &[u8]) -> Result<(), TunnelError> {
    if response != EXPECTED_RESPONSE {
        return Err(TunnelError::UnexpectedResponse(
            String::from_utf8_lossy(response).into_owned(),
        ));
    }
    Ok(())
}

/// Ask the proxy on `stream` to open a tunnel to `addr`.
///
/// Reads exactly `EXPECTED_RESPONSE.len()` bytes. On success the stream carries the
/// tunneled byte stream and nothing beyond the response has been consumed.
pub async fn establish_tunnel<S>(stream: &mut S, addr: &str) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = encode_connect_request(addr);
    stream.write_all(&request).await.map_err(TunnelError::Write)?;
    stream.flush().await.map_err(TunnelError::Write)?;

    let mut response = [0u8; EXPECTED_RESPONSE.len()];
    stream
        .read_exact(&mut response)
        .await
        .map_err(TunnelError::Read)?;

    check_response(&response)?;
    tracing::debug!(target_addr = %addr, "proxy tunnel established");
    Ok(())
}
