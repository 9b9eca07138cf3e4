// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Per-route token-bucket rate limiting (spec §5), mounted as Tower layers
//! in front of submission routes.

/// The token bucket algorithm and its refill model.
pub mod bucket;
/// `X-Forwarded-For` / `X-Real-IP` / peer client-key resolution.
pub mod client_ip;
/// The Tower `Layer`/`Service` pair enforcing a [`bucket::BucketConfig`].
pub mod limiter;
/// Default per-route bucket presets.
pub mod presets;

pub use bucket::BucketConfig;
pub use client_ip::client_key;
pub use limiter::{RateLimiter, RateLimiterLayer, RateLimiterService};
