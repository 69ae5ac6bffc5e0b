//! Host header normalization.
//!
//! # Responsibilities
//! - Extract the routing key from a request (URI authority, then Host header)
//! - Strip the port suffix, including bracketed IPv6 forms
//! - Lowercase for case-insensitive matching
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - A single trailing dot is dropped (`a.example.` is `a.example`)
//! - No wildcard or regex matching; lookup stays a single hash lookup

use axum::http::{header, Request};

/// Normalize a host header value into a route table key.
///
/// Returns `None` for values that cannot name a virtual host.
pub fn normalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port or [v6]
        let end = rest.find(']')?;
        let tail = &rest[end + 1..];
        if !tail.is_empty() && !valid_port_suffix(tail) {
            return None;
        }
        &raw[..end + 2]
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                if !port.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                host
            }
            Some(_) => return None,
            None => raw,
        }
    };

    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn valid_port_suffix(tail: &str) -> bool {
    tail.strip_prefix(':')
        .map(|port| port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Routing key for a request.
///
/// An absolute-form request target names the host itself and overrides
/// the `Host` header; origin-form requests use the header.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.uri()
        .authority()
        .and_then(|a| normalize(a.as_str()))
        .or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(normalize)
        })
}
