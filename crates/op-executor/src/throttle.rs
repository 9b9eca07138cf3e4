// SPDX-License-Identifier: MIT OR Apache-2.0
//! Progress emission throttling and derived-metric recomputation (spec
//! §4.5 "Progress pipeline").

use op_core::GpuMetrics;
use std::time::{Duration, Instant};

/// Default throttle window: an event is emitted only if the step advanced
/// and at least this much time passed since the last emit.
pub const DEFAULT_MIN_EMIT_INTERVAL: Duration = Duration::from_millis(500);

/// How often host GPU metrics are refreshed, independent of the progress
/// throttle.
pub const GPU_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Metrics recomputed for each emitted progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    /// Steps per second since the previous emitted sample.
    pub iteration_speed: Option<f64>,
    /// Estimated seconds remaining at the current speed.
    pub eta_seconds: Option<i64>,
}

/// Decides whether a progress sample is worth emitting, and recomputes
/// `iteration_speed`/`eta_seconds` against the previously emitted sample
/// when it is.
pub struct ProgressThrottler {
    min_emit_interval: Duration,
    last_emitted_step: Option<u64>,
    last_emit_at: Option<Instant>,
}

impl ProgressThrottler {
    /// Builds a throttler with an explicit emit interval.
    pub fn new(min_emit_interval: Duration) -> Self {
        Self { min_emit_interval, last_emitted_step: None, last_emit_at: None }
    }

    /// Considers one observed `(step, total_steps)` sample at `now`.
    /// `terminal` samples are always emitted regardless of throttling (spec:
    /// "with the exception that terminal events are always emitted").
    pub fn poll(&mut self, step: u64, total_steps: u64, terminal: bool, now: Instant) -> Option<DerivedMetrics> {
        let advanced = self.last_emitted_step.is_none_or(|last| step > last);
        let interval_elapsed =
            self.last_emit_at.is_none_or(|at| now.saturating_duration_since(at) >= self.min_emit_interval);

        if !terminal && !(advanced && interval_elapsed) {
            return None;
        }

        let derived = match (self.last_emitted_step, self.last_emit_at) {
            (Some(last_step), Some(last_time)) if step > last_step => {
                let elapsed = now.saturating_duration_since(last_time).as_secs_f64();
                if elapsed > 0.0 {
                    let speed = (step - last_step) as f64 / elapsed;
                    let eta = (speed > 0.0)
                        .then(|| ((total_steps.saturating_sub(step)) as f64 / speed).round() as i64);
                    DerivedMetrics { iteration_speed: Some(speed), eta_seconds: eta }
                } else {
                    DerivedMetrics::default()
                }
            }
            _ => DerivedMetrics::default(),
        };

        self.last_emitted_step = Some(step);
        self.last_emit_at = Some(now);
        Some(derived)
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_EMIT_INTERVAL)
    }
}

/// A source of host GPU metrics; production wiring queries `nvidia-smi` or
/// an NVML binding, the mock plugin returns a fixed sample.
pub trait GpuMetricsSource: Send + Sync {
    /// Samples current GPU state, or `None` if no GPU is present/reachable.
    fn sample(&self) -> Option<GpuMetrics>;
}

/// Rate-limits calls into a [`GpuMetricsSource`] to [`GPU_REFRESH_INTERVAL`],
/// returning the last sampled value between refreshes.
pub struct GpuMetricsCache<S: GpuMetricsSource> {
    source: S,
    last_sample: Option<GpuMetrics>,
    last_refresh: Option<Instant>,
}

impl<S: GpuMetricsSource> GpuMetricsCache<S> {
    /// Wraps `source`, unrefreshed.
    pub fn new(source: S) -> Self {
        Self { source, last_sample: None, last_refresh: None }
    }

    /// Returns the current sample, refreshing from `source` if
    /// [`GPU_REFRESH_INTERVAL`] has elapsed since the last refresh.
    pub fn get(&mut self, now: Instant) -> Option<GpuMetrics> {
        let stale = self.last_refresh.is_none_or(|at| now.saturating_duration_since(at) >= GPU_REFRESH_INTERVAL);
        if stale {
            self.last_sample = self.source.sample();
            self.last_refresh = Some(now);
        }
        self.last_sample.clone()
    }
}
