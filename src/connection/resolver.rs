//! Hostname resolution

use super::dial::DialConfig;
use crate::{Error, Result};
use std::net::IpAddr;

/// Resolve `host` to its IP addresses.
///
/// A thin pass-through to the system resolver. Binding lookups to a device is not
/// supported here, so a configured device-binding service address fails fast.
pub async fn lookup_ip(host: &str, config: &DialConfig) -> Result<Vec<IpAddr>> {
    if config.bind_to_device_service_address().is_some() {
        return Err(Error::Unsupported(
            "LookupIP with bind not supported on this platform".into(),
        ));
    }

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    // lookup_host wants a port; it is discarded
    let addrs = tokio::net::lookup_host((host, 0)).await?;
    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in addrs {
        if !ips.contains(&addr.ip()) {
            ips.push(addr.ip());
        }
    }
    Ok(ips)
}
