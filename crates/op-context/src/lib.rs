// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Correlation and interaction ID propagation across async boundaries (C1).
//!
//! The source system installs these into a per-context slot set by
//! middleware and read by loggers. Rust has no implicit thread-local that
//! survives a `tokio::spawn`, so this crate uses an explicit
//! [`tokio::task_local!`] scope plus helpers for re-installing the same
//! context at every suspension boundary a job crosses (HTTP handler ->
//! queue submit, queue consume -> executor).

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static CONTEXT: RequestContext;
}

/// The request-scoped identifiers every log line and progress event should
/// carry while in scope.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: String,
    interaction_id: Option<String>,
}

impl RequestContext {
    /// Builds a context with a correlation ID and no interaction ID.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            interaction_id: None,
        }
    }

    /// Builds a context carrying both identifiers.
    pub fn with_interaction(correlation_id: impl Into<String>, interaction_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            interaction_id: Some(interaction_id.into()),
        }
    }

    /// Resolves a correlation ID header value: accepted verbatim (opaque) if
    /// present and non-empty, otherwise synthesized as `req-<12 hex>`.
    pub fn resolve_correlation_id(header_value: Option<&str>) -> String {
        match header_value {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => format!("req-{}", &Uuid::new_v4().simple().to_string()[..12]),
        }
    }
}

/// Runs `f` with `ctx` installed as the active [`RequestContext`].
///
/// This is the only way to install a context; it is scoped to the future
/// `f` produces, so nested `tokio::spawn`s must explicitly re-enter with
/// [`with_context`] using a cloned [`RequestContext`] if they need the same
/// identifiers.
pub async fn with_context<F, T>(ctx: RequestContext, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CONTEXT.scope(ctx, f).await
}

/// The correlation ID active in the current context, if any.
///
/// A context with no ID set (i.e. no [`with_context`] scope active) returns
/// `None`; log records omit the field in that case, per spec §4.1 failure
/// semantics.
pub fn get_correlation_id() -> Option<String> {
    CONTEXT.try_with(|c| c.correlation_id.clone()).ok()
}

/// The interaction ID active in the current context, if any.
pub fn get_interaction_id() -> Option<String> {
    CONTEXT.try_with(|c| c.interaction_id.clone()).ok().flatten()
}
