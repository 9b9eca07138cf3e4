// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tower middleware enforcing one [`BucketConfig`] per route, keyed by
//! [`client_key`](crate::client_ip::client_key).

use crate::bucket::{BucketConfig, TokenBucket};
use crate::client_ip::client_key;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use op_core::OpErrorKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::warn;

/// A named rate limit, shared across clones (one per mounted route).
#[derive(Clone)]
pub struct RateLimiter {
    route: &'static str,
    config: BucketConfig,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    /// Builds a limiter for `route` (used only in logs) enforcing `config`.
    pub fn new(route: &'static str, config: BucketConfig) -> Self {
        Self { route, config, buckets: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Checks and debits one token for `key`, creating its bucket on first
    /// use.
    pub async fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut guard = self.buckets.lock().await;
        let bucket = guard.entry(key.to_string()).or_insert_with(|| TokenBucket::new(self.config, now));
        match bucket.try_acquire(now) {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                let retry_after_secs = retry_after.as_secs_f64().ceil() as u64;
                warn!(route = self.route, client_key = key, retry_after_secs, "rate.exceeded");
                Err(retry_after_secs.max(1))
            }
        }
    }

    /// Wraps this limiter as a Tower [`Layer`](tower::Layer).
    pub fn into_layer(self) -> RateLimiterLayer {
        RateLimiterLayer(self)
    }
}

fn too_many_requests(limit: u32, retry_after_secs: u64) -> Response<Body> {
    let kind = OpErrorKind::RateExceeded { retry_after_secs };
    let body = serde_json::json!({ "error": kind.detail(), "retry_after": retry_after_secs });
    let mut resp = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    let headers = resp.headers_mut();
    headers.insert("retry-after", HeaderValue::from_str(&retry_after_secs.to_string()).unwrap());
    headers.insert("x-ratelimit-limit", HeaderValue::from_str(&limit.to_string()).unwrap());
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    resp
}

/// Tower [`Layer`] mounting a [`RateLimiter`] in front of a route.
#[derive(Clone)]
pub struct RateLimiterLayer(RateLimiter);

impl<S: Clone> tower::Layer<S> for RateLimiterLayer {
    type Service = RateLimiterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimiterService { limiter: self.0.clone(), inner }
    }
}

/// Tower [`Service`] that debits a token before forwarding to the inner
/// service, short-circuiting with a 429 when the bucket is empty.
#[derive(Clone)]
pub struct RateLimiterService<S> {
    limiter: RateLimiter,
    inner: S,
}

impl<S> tower::Service<Request<Body>> for RateLimiterService<S>
where
    S: tower::Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: IntoResponse,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response<Body>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let key = client_key(&req);
        Box::pin(async move {
            match limiter.check(&key).await {
                Ok(()) => inner.call(req).await,
                Err(retry_after_secs) => Ok(too_many_requests(limiter.config.capacity, retry_after_secs)),
            }
        })
    }
}
