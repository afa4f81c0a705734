//! Raw transport establishment (direct TCP or HTTP CONNECT tunnel)

use super::dial::DialConfig;
use super::proxy::establish_tunnel;
use super::resolver::lookup_ip;
use crate::{Error, Result};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;

/// Network kind accepted by the dialer, matching the `tcp`/`tcp4`/`tcp6` convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Network {
    /// IPv4 or IPv6
    #[default]
    Tcp,
    /// IPv4 only
    Tcp4,
    /// IPv6 only
    Tcp6,
}

impl Network {
    /// Whether `ip` may be dialed on this network
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => ip.is_ipv4(),
            Self::Tcp6 => ip.is_ipv6(),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Tcp4 => write!(f, "tcp4"),
            Self::Tcp6 => write!(f, "tcp6"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            _ => Err(Error::Config(format!(
                "unsupported network '{}': expected tcp, tcp4, or tcp6",
                s
            ))),
        }
    }
}

/// Split `host:port`, stripping IPv6 brackets from the host.
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("missing port in address '{}'", addr)))?;

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Config(format!("invalid port in address '{}'", addr)))?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    Ok((host, port))
}

/// Connect to `addr` over plain TCP.
///
/// Resolved addresses not matching `network` are skipped; the rest are tried in order and
/// the last connect error is returned if none succeeds.
pub async fn connect_tcp(
    network: Network,
    addr: &str,
    config: &DialConfig,
    nodelay: bool,
) -> Result<TcpStream> {
    let (host, port) = split_host_port(addr)?;
    let ips = lookup_ip(host, config).await?;

    let mut last_err = None;
    for ip in ips.into_iter().filter(|ip| network.accepts(ip)) {
        match TcpStream::connect(SocketAddr::new(ip, port)).await {
            Ok(stream) => {
                if nodelay {
                    stream.set_nodelay(true)?;
                }
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(Error::Io(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address found for '{}'", network, host),
        )
    })))
}

/// Raw byte-stream connection to the dial target, possibly through a proxy tunnel.
#[derive(Debug)]
pub struct EstablishedTransport {
    stream: TcpStream,
    proxy: Option<String>,
}

impl EstablishedTransport {
    /// Open the transport for a dial to `addr`.
    ///
    /// With an HTTP proxy configured, the TCP connection goes to the proxy and a CONNECT
    /// tunnel to `addr` is set up before returning. On failure the socket is dropped.
    pub async fn establish(
        network: Network,
        addr: &str,
        config: &DialConfig,
        nodelay: bool,
    ) -> Result<Self> {
        let dial_addr = config.http_proxy_address().unwrap_or(addr);
        let mut stream = connect_tcp(network, dial_addr, config, nodelay).await?;
        tracing::debug!(dial_addr, "transport connected");

        if let Some(proxy) = config.http_proxy_address() {
            establish_tunnel(&mut stream, addr).await?;
            return Ok(Self {
                stream,
                proxy: Some(proxy.to_string()),
            });
        }

        Ok(Self {
            stream,
            proxy: None,
        })
    }

    /// Proxy the transport is tunneled through, if any
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Underlying TCP stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Hand the stream to the TLS layer
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
