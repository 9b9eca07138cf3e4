// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Job executor, plugin contract, and stage machine (C5): drives one
//! training or generation run from `queued` to a terminal stage, owning
//! the progress-throttling and cancellation-with-grace-period policy
//! (spec §4.5).

/// Cooperative cancellation tokens and per-run cancellation tracking.
pub mod cancel;
/// The executor itself: stage sequencing, progress application, completion.
pub mod executor;
/// Plugin contracts ([`plugin::TrainingPlugin`], [`plugin::ImagePlugin`]).
pub mod plugin;
/// The stage transition table.
pub mod stage;
/// Subprocess stdout/stderr marker parsing.
pub mod subprocess;
/// Progress emission throttling and GPU metrics refresh.
pub mod throttle;

pub use cancel::{AlreadyTerminal, CancellableRun, CancellationReason, CancellationToken};
pub use executor::{Executor, CANCEL_GRACE_PERIOD};
pub use plugin::{GenerationRunConfig, ImagePlugin, PluginOutcome, PluginProgress, TrainingPlugin, TrainingRunConfig};
pub use stage::{validate_transition, IllegalTransition};
pub use subprocess::{parse_line, MarkerTracker, ParsedMarkers};
pub use throttle::{DerivedMetrics, GpuMetricsCache, GpuMetricsSource, ProgressThrottler, DEFAULT_MIN_EMIT_INTERVAL};
