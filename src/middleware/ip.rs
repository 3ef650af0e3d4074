//! Client IP resolution for exchange records.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For` header (first IP in a comma-separated list)
//! 2. `X-Real-IP` header
//! 3. The raw peer address from Axum's `ConnectInfo<SocketAddr>` extension
//! 4. Empty string
//!
//! # Security Warning
//!
//! Proxy headers are client-controlled unless a trusted reverse proxy
//! overwrites them. The resolved address is recorded for diagnostics only and
//! must not be used for access decisions.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Where the client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Resolve the client address, never failing.
///
/// Returns an empty string when neither proxy headers nor the connection
/// address are available (e.g. the router was served without
/// `into_make_service_with_connect_info`).
pub fn resolve_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    match extract_ip_from_headers(req) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Cow::Owned(addr.to_string()))
            .unwrap_or(Cow::Borrowed("")),
    }
}
