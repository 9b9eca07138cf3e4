// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability schema (spec §3 "Capability Schema").
//!
//! A plugin's self-description of what it actually supports. Consumed
//! exclusively by the validator in `op-capability`; nothing else should
//! branch on these types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The declared type of a capability-schema parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// A whole number, optionally bounded by `min`/`max`.
    Int,
    /// A floating point number, optionally bounded by `min`/`max`.
    Float,
    /// A boolean toggle.
    Bool,
    /// One of a fixed set of strings, given by `options`.
    Enum,
    /// A free-form string.
    String,
}

/// Describes one config parameter a plugin may or may not actually apply.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    /// The parameter's declared type.
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Inclusive lower bound, for `int`/`float`.
    pub min: Option<f64>,
    /// Inclusive upper bound, for `int`/`float`.
    pub max: Option<f64>,
    /// Step size, for `int`/`float`, advisory only (not enforced by the
    /// validator).
    pub step: Option<f64>,
    /// Allowed values, for `enum`.
    pub options: Option<Vec<String>>,
    /// Default value, advisory only.
    pub default: Option<serde_json::Value>,
    /// Whether the plugin will actually apply this parameter if submitted.
    /// An unwired parameter is advertised for UI purposes but rejected by
    /// the validator.
    pub wired: bool,
    /// Why the parameter is unwired, if `wired` is `false`.
    pub reason: Option<String>,
}

/// Describes one boolean feature toggle a plugin may or may not support.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToggleSpec {
    /// Whether the plugin supports this toggle being enabled.
    pub supported: bool,
    /// Why the toggle is unsupported, if `supported` is `false`.
    pub reason: Option<String>,
}

/// A plugin's full self-description.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapabilitySchema {
    /// The method or backend name this schema describes.
    pub method: String,
    /// Named variants this plugin supports (e.g. model families).
    pub variants: Vec<String>,
    /// Feature toggles, keyed by toggle name.
    pub toggles: BTreeMap<String, ToggleSpec>,
    /// Config parameters, keyed by parameter name.
    pub parameters: BTreeMap<String, ParameterSpec>,
}
