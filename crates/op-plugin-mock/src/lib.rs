// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Deterministic synthetic plugins for fast-test mode: no GPU, no real
//! diffusion model, predictable progress and placeholder artifacts so the
//! rest of the plane can be exercised end to end (spec §6 `mode`).

/// The fixed synthetic GPU metrics source.
pub mod gpu;
/// The mock image-generation plugin.
pub mod image;
/// The mock training plugin.
pub mod training;

pub use gpu::MockGpuMetricsSource;
pub use image::MockImagePlugin;
pub use training::MockTrainingPlugin;
