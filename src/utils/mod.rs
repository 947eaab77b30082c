use std::net::{IpAddr, SocketAddr};

use hyper::HeaderMap;

/// Convert a duration to milliseconds
pub fn duration_to_millis(duration: std::time::Duration) -> u64 {
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

/// Resolve the client address used for rate limiting.
///
/// `X-Forwarded-For` is only consulted when the gateway sits behind a trusted
/// proxy. Only the rightmost entry is used: that is the address the proxy
/// itself appended, everything to its left is client supplied.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.rsplit(',').next())
            .and_then(|s| s.trim().parse().ok());

        if forwarded.is_some() {
            return forwarded;
        }
    }

    peer.map(|addr| addr.ip())
}

/// Collapse an env-style name (`UPSTREAM_ORDER_SERVICE_URL` -> `order-service`)
pub fn upstream_name_from_env_key(key: &str) -> Option<String> {
    let name = key.strip_prefix("UPSTREAM_")?.strip_suffix("_URL")?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase().replace('_', "-"))
}
