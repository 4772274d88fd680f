//! Outbound HTTP URL safety checks for MCP backends.
//!
//! Gateway configuration is operator-controlled, not end-user-controlled,
//! but a misconfigured `url` (e.g. a typo resolving to a cloud metadata
//! endpoint) should fail loudly rather than silently succeed.

use mcpg_errors::TransportError;

/// Scheme whitelist plus a pre-flight DNS check against private, loopback,
/// link-local, and cloud-metadata IP ranges.
pub fn preflight_http_url(backend_id: &str, url: &str) -> Result<(), TransportError> {
    validate_scheme(backend_id, url)?;
    preflight_dns(backend_id, url)
}

fn validate_scheme(backend_id: &str, url: &str) -> Result<(), TransportError> {
    let scheme_end = url.find("://").ok_or_else(|| TransportError::HttpTransportFailed {
        backend: backend_id.to_string(),
        transport: "http",
        message: format!("url '{url}' has no scheme"),
    })?;

    match url[..scheme_end].to_ascii_lowercase().as_str() {
        "http" | "https" => Ok(()),
        other => Err(TransportError::HttpTransportFailed {
            backend: backend_id.to_string(),
            transport: "http",
            message: format!("unsupported URL scheme '{other}://'"),
        }),
    }
}

fn preflight_dns(backend_id: &str, url: &str) -> Result<(), TransportError> {
    use std::net::ToSocketAddrs;

    let Some((host, port)) = parse_host_port(url) else {
        return Ok(());
    };

    let socket_addr = format!("{host}:{port}");
    let Ok(addrs) = socket_addr.to_socket_addrs() else {
        return Ok(());
    };

    for addr in addrs {
        if is_ssrf_dangerous_ip(addr.ip()) {
            return Err(TransportError::HttpTransportFailed {
                backend: backend_id.to_string(),
                transport: "http",
                message: format!("resolved IP {} is a private/reserved address", addr.ip()),
            });
        }
    }
    Ok(())
}

/// Extracts `(host, port)` from an `http(s)://` URL with basic string
/// parsing (no userinfo, IPv6-bracket aware).
pub fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let after_scheme = url.split("://").nth(1)?;
    let authority = after_scheme.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    let default_port = if url.starts_with("https") { 443 } else { 80 };

    if let Some(bracket_end) = host_port.find(']') {
        let host = &host_port[..=bracket_end];
        let port = host_port[bracket_end + 1..]
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        Some((host.to_string(), port))
    } else if let Some((h, p)) = host_port.rsplit_once(':') {
        Some((h.to_string(), p.parse().unwrap_or(default_port)))
    } else {
        Some((host_port.to_string(), default_port))
    }
}

/// Whether `ip` falls in a private, loopback, link-local, or cloud
/// metadata range that outbound HTTP should never target.
pub fn is_ssrf_dangerous_ip(ip: std::net::IpAddr) -> bool {
    use std::net::{Ipv4Addr, Ipv6Addr};

    match ip {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4 == Ipv4Addr::UNSPECIFIED
                || v4.octets() == [169, 254, 169, 254]
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback() || v6 == Ipv6Addr::UNSPECIFIED,
    }
}
