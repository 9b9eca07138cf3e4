// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the job orchestration plane (spec §7).
//!
//! Every error carries one [`OpErrorKind`]; the core never encodes an HTTP
//! status itself — that mapping lives at the `op-daemon` edge, per spec §7's
//! "the HTTP layer NEVER leaks stack traces to the client" rule: the core's
//! job is to classify, not to format a response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the error kinds named in spec §7.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpErrorKind {
    /// Config failed capability validation or schema bounds.
    #[error("validation rejected: {reason}")]
    ValidationRejected {
        /// Why the submission was rejected.
        reason: String,
    },

    /// A referenced entity (job, character, LoRA, artifact) is missing.
    #[error("not found: {resource}")]
    ResourceNotFound {
        /// What was missing.
        resource: String,
    },

    /// E.g. cancel requested on a job already in a terminal state.
    #[error("conflict: {reason}")]
    ResourceConflict {
        /// Why the operation conflicts with current state.
        reason: String,
    },

    /// A plugin's health check failed.
    #[error("plugin unavailable: {reason}")]
    PluginUnavailable {
        /// Why the plugin is unavailable.
        reason: String,
    },

    /// A plugin returned `success=false` or raised.
    #[error("plugin failed: {message}")]
    PluginFailed {
        /// Short error message.
        message: String,
        /// Plugin-reported error class/type name, if any.
        error_type: Option<String>,
        /// Full stack trace, retained for the job log / debug bundle only.
        error_stack: Option<String>,
    },

    /// The stream store hiccuped; retried by the caller with backoff.
    #[error("queue transient failure: {reason}")]
    QueueTransient {
        /// What went wrong.
        reason: String,
    },

    /// The token bucket denied the request.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateExceeded {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },
}

impl OpErrorKind {
    /// The short, client-safe message for this error's `{detail}` body.
    ///
    /// Never includes a stack trace; `PluginFailed::error_stack` is only
    /// ever surfaced through the debug bundle.
    pub fn detail(&self) -> String {
        match self {
            OpErrorKind::PluginFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// A contextualized [`OpErrorKind`], the error type returned by plane
/// operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct OpError {
    /// The classified error kind.
    pub kind: OpErrorKind,
    /// Optional free-form context appended by an intermediate caller.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl OpError {
    /// Wraps a kind with no additional source context.
    pub fn new(kind: OpErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<OpErrorKind> for OpError {
    fn from(kind: OpErrorKind) -> Self {
        OpError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_failed_detail_omits_stack_trace() {
        let kind = OpErrorKind::PluginFailed {
            message: "out of memory".into(),
            error_type: Some("OOMError".into()),
            error_stack: Some("at train() line 42\nat main() line 7".into()),
        };
        let detail = kind.detail();
        assert_eq!(detail, "out of memory");
        assert!(!detail.contains("line 42"));
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = OpErrorKind::RateExceeded { retry_after_secs: 5 };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "rate_exceeded");
        assert_eq!(json["retry_after_secs"], 5);
    }

    #[test]
    fn validation_rejected_detail_carries_reason() {
        let kind = OpErrorKind::ValidationRejected { reason: "gradient_accumulation not wired".into() };
        assert_eq!(kind.detail(), "validation rejected: gradient_accumulation not wired");
    }
}
