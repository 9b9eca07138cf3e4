// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plugin selection at process start.
//!
//! The source system resolved plugins through an in-process Python registry
//! (`packages/plugins/{training,image}/src/registry.py`), explicitly flagged
//! for redesign (SPEC_FULL.md §9: plugins become an opaque, explicitly
//! injected trait object rather than a name-keyed registry). No HTTP sidecar
//! wire protocol is specified anywhere in spec.md, and the workspace carries
//! no HTTP-client crate, so `training_plugin_url`/`generation_plugin_url`
//! are resolved and logged but not dialed: both plugin slots are always the
//! bundled mock implementation. A real deployment swaps these two
//! constructors for a crate implementing `TrainingPlugin`/`ImagePlugin`
//! against its own process boundary.

use op_config::Config;
use op_executor::{ImagePlugin, TrainingPlugin};
use op_plugin_mock::{MockImagePlugin, MockTrainingPlugin};
use std::sync::Arc;

/// Selects the training plugin for this process.
pub fn select_training_plugin(config: &Config) -> Arc<dyn TrainingPlugin> {
    if let Some(url) = &config.training_plugin_url {
        tracing::warn!(url = %url, "training_plugin_url configured but no sidecar client is wired; using mock plugin");
    }
    Arc::new(MockTrainingPlugin::new())
}

/// Selects the image generation plugin for this process.
pub fn select_image_plugin(config: &Config) -> Arc<dyn ImagePlugin> {
    if let Some(url) = &config.generation_plugin_url {
        tracing::warn!(url = %url, "generation_plugin_url configured but no sidecar client is wired; using mock plugin");
    }
    Arc::new(MockImagePlugin::new())
}
