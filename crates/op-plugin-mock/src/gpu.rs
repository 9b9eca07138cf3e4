// SPDX-License-Identifier: MIT OR Apache-2.0
//! A fixed [`GpuMetricsSource`] for fast-test mode: no real GPU is queried,
//! a plausible-looking constant sample is returned instead.

use op_core::GpuMetrics;
use op_executor::GpuMetricsSource;

/// Always reports the same synthetic reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockGpuMetricsSource;

impl GpuMetricsSource for MockGpuMetricsSource {
    fn sample(&self) -> Option<GpuMetrics> {
        Some(GpuMetrics { utilization: 87.0, memory_used: 18.2, memory_total: 24.0, temperature: 68.0, power_watts: 210.0 })
    }
}
