//! Header policy applied on both legs of a forwarded exchange.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from requests and responses
//! - Extend X-Forwarded-For with one token per hop
//! - Add the proxy's `Via` entry
//!
//! # Design Decisions
//! - `HeaderMap` names are normalized to lowercase, so matching is
//!   case-insensitive regardless of how the peer spelled them
//! - Existing X-Forwarded-For entries are preserved, never replaced

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Version};

use crate::identity::ProxyIdentity;

/// Forwarding-chain header name.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers meaningful only between two directly connected parties.
pub const HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    HeaderName::from_static("trailers"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove every hop-by-hop header, including all of its values.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in &HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append `hop` to the forwarding chain.
///
/// Multiple prior header lines are folded into a single comma-separated
/// value before the new token is appended.
pub fn append_forwarding_hop(headers: &mut HeaderMap, hop: &str) {
    let mut chain: Vec<u8> = Vec::new();
    for prior in headers.get_all(&X_FORWARDED_FOR) {
        if !chain.is_empty() {
            chain.extend_from_slice(b", ");
        }
        chain.extend_from_slice(prior.as_bytes());
    }
    if !chain.is_empty() {
        chain.extend_from_slice(b", ");
    }
    chain.extend_from_slice(hop.as_bytes());

    match HeaderValue::from_bytes(&chain) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR, value);
        }
        Err(_) => {
            tracing::warn!(hop = %hop, "Forwarding hop is not a valid header value, chain left unchanged");
        }
    }
}

/// Token identifying the previous hop: the peer's IP, port stripped.
pub fn forwarding_token(peer: SocketAddr) -> String {
    peer.ip().to_string()
}

/// Append this proxy's entry to the `Via` header.
pub fn append_via(headers: &mut HeaderMap, identity: &ProxyIdentity, version: Version) {
    if let Some(token) = identity.via_token(version) {
        headers.append(header::VIA, token);
    }
}
