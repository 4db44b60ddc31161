//! Client address extraction.
//!
//! Priority: `X-Real-IP`, then the first hop of `X-Forwarded-For`, then the
//! transport peer address. The relay is expected to sit behind a proxy that
//! sets these headers; they are not validated.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Header set by the fronting proxy to the client address.
pub const REAL_IP: &str = "x-real-ip";

/// Proxy chain header; the first entry is the client.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Extract the client address for a request.
#[must_use]
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(ip) = header_str(headers, REAL_IP) {
        return Some(ip.to_string());
    }

    if let Some(first) = header_str(headers, FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return Some(first.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
