// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-key resolution (spec §5): `X-Forwarded-For[0]` → `X-Real-IP` →
//! peer address.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::SocketAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Resolves the bucket key for one request.
pub fn client_key<B>(req: &Request<B>) -> String {
    key_from_parts(req.headers(), req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0))
}

fn key_from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get(REAL_IP).and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}
