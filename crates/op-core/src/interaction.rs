// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interaction Register entities (spec §3 "Interaction (C6)").

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`Interaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    /// Steps are still being appended.
    InProgress,
    /// Completed without error.
    Success,
    /// Completed with at least one error step.
    Error,
}

/// Which tier appended a given [`InteractionStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepComponent {
    /// The browser/client tier.
    Frontend,
    /// The HTTP/SSE edge.
    Backend,
    /// A queue worker.
    Worker,
    /// A training/generation plugin.
    Plugin,
    /// A third-party service.
    External,
    /// The stream queue itself.
    Queue,
}

/// One timestamped step within an [`Interaction`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InteractionStep {
    /// Unique step identifier.
    pub step_id: String,
    /// The interaction this step belongs to.
    pub interaction_id: String,
    /// Correlation ID active when this step was recorded.
    pub correlation_id: String,
    /// Free-form step type (e.g. `"http.request"`, `"plugin.call"`).
    #[serde(rename = "type")]
    pub step_type: String,
    /// Which tier produced this step.
    pub component: StepComponent,
    /// When this step was recorded.
    pub timestamp: DateTime<Utc>,
    /// How long this step took, if known.
    pub duration_ms: Option<i64>,
    /// Human-readable description.
    pub message: String,
    /// `"ok"`, `"error"`, or another free-form status string.
    pub status: String,
    /// Arbitrary structured detail, redacted before being persisted.
    pub details: Option<serde_json::Value>,
}

/// A user-level operation spanning multiple tiers, composed of timestamped
/// steps (spec §3, §4.6).
///
/// Invariants: append-only until explicitly completed; creating an
/// interaction with an existing ID is idempotent; appending steps is always
/// additive.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Interaction {
    /// Unique interaction identifier.
    pub interaction_id: String,
    /// Correlation ID of the request that started this interaction.
    pub correlation_id: String,
    /// Name of the action this interaction represents.
    pub action_name: String,
    /// Optional grouping category for the action.
    pub action_category: Option<String>,
    /// When the interaction began.
    pub started_at: DateTime<Utc>,
    /// When the interaction was completed, if it has been.
    pub ended_at: Option<DateTime<Utc>>,
    /// `ended_at - started_at` in milliseconds, computed only when both
    /// timestamps are valid at `complete` time.
    pub duration_ms: Option<i64>,
    /// Current lifecycle status.
    pub status: InteractionStatus,
    /// Short error summary, set when `status` is `error`.
    pub error_summary: Option<String>,
    /// Originating page/route, if known.
    pub page: Option<String>,
    /// Originating client user agent, if known.
    pub user_agent: Option<String>,
    /// Number of steps appended so far.
    pub step_count: u32,
    /// Number of appended steps whose `status` was `"error"`.
    pub error_count: u32,
    /// The steps appended so far, in append order.
    pub steps: Vec<InteractionStep>,
}
