// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Capability validator (spec §4.5 "Capability validator"): checks a
//! submitted config against a plugin's [`CapabilitySchema`] before a job is
//! ever queued.
//!
//! Generalized from the teacher's `abp-capability::negotiate` (which
//! compares a manifest against requirements and buckets the result into
//! native/emulatable/unsupported) into a field-by-field validator, since
//! this plane's capability schema describes submitted-config legality
//! rather than agent-vs-backend negotiation.

use op_core::{CapabilitySchema, ParameterType};

/// One field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The offending field name.
    pub field: String,
    /// Why it was rejected, suitable for surfacing verbatim to the caller.
    pub reason: String,
}

/// The full outcome of validating a submission against a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Known fields that passed validation.
    pub accepted: Vec<String>,
    /// Fields that failed validation, in submission order.
    pub rejected: Vec<Rejection>,
}

impl ValidationResult {
    /// `true` when nothing was rejected.
    pub fn is_valid(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Validates each `parameters`-described field of `config` against `schema`
/// (spec §4.5: unwired rejection, numeric bounds, enum membership, bool
/// typing). Fields absent from `schema.parameters` are ignored, for forward
/// compatibility.
pub fn validate_parameters(schema: &CapabilitySchema, config: &serde_json::Value) -> ValidationResult {
    let mut result = ValidationResult::default();
    let Some(fields) = config.as_object() else {
        return result;
    };

    for (name, value) in fields {
        let Some(spec) = schema.parameters.get(name) else {
            continue;
        };

        if !spec.wired {
            result.rejected.push(Rejection {
                field: name.clone(),
                reason: spec.reason.clone().unwrap_or_else(|| format!("{name} is not wired")),
            });
            continue;
        }

        let violation = match spec.param_type {
            ParameterType::Int | ParameterType::Float => {
                value.as_f64().and_then(|n| check_bounds(n, spec.min, spec.max)).map(|reason| format!("{name}: {reason}"))
            }
            ParameterType::Bool => (!value.is_boolean()).then(|| format!("{name} must be a boolean")),
            ParameterType::Enum => {
                let options = spec.options.as_deref().unwrap_or(&[]);
                let matches = value.as_str().is_some_and(|s| options.iter().any(|o| o == s));
                (!matches).then(|| format!("{name} must be one of {options:?}"))
            }
            ParameterType::String => None,
        };

        match violation {
            Some(reason) => result.rejected.push(Rejection { field: name.clone(), reason }),
            None => result.accepted.push(name.clone()),
        }
    }

    result
}

fn check_bounds(value: f64, min: Option<f64>, max: Option<f64>) -> Option<String> {
    if let Some(min) = min {
        if value < min {
            return Some(format!("must be >= {min}"));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Some(format!("must be <= {max}"));
        }
    }
    None
}

/// Validates `use_*` toggles in `config` against `schema.toggles` (spec
/// §4.5: "each truthy `use_*` toggle MUST have a corresponding
/// `{supported: true}` entry in `toggles`").
pub fn validate_toggles(schema: &CapabilitySchema, config: &serde_json::Value) -> ValidationResult {
    let mut result = ValidationResult::default();
    let Some(fields) = config.as_object() else {
        return result;
    };

    for (name, value) in fields {
        if !name.starts_with("use_") {
            continue;
        }
        if !value.as_bool().unwrap_or(false) {
            continue;
        }

        match schema.toggles.get(name) {
            Some(toggle) if toggle.supported => result.accepted.push(name.clone()),
            Some(toggle) => result.rejected.push(Rejection {
                field: name.clone(),
                reason: toggle.reason.clone().unwrap_or_else(|| format!("{name} is not supported")),
            }),
            None => result.rejected.push(Rejection { field: name.clone(), reason: format!("{name} is not a known toggle") }),
        }
    }

    result
}

/// Validates both parameters and toggles, returning the union of both
/// passes' rejections in submission order.
pub fn validate_submission(schema: &CapabilitySchema, config: &serde_json::Value) -> ValidationResult {
    let mut result = validate_parameters(schema, config);
    let toggles = validate_toggles(schema, config);
    result.accepted.extend(toggles.accepted);
    result.rejected.extend(toggles.rejected);
    result
}

/// Validates a submission and converts the first rejection, if any, into an
/// [`op_core::OpError`] (spec §8 "Capability rejection... the body includes
/// the plugin's reason").
pub fn validate_or_reject(schema: &CapabilitySchema, config: &serde_json::Value) -> Result<(), op_core::OpError> {
    let result = validate_submission(schema, config);
    match result.rejected.first() {
        Some(rejection) => Err(op_core::OpErrorKind::ValidationRejected {
            reason: format!("{}: {}", rejection.field, rejection.reason),
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{ParameterSpec, ToggleSpec};
    use std::collections::BTreeMap;

    fn schema() -> CapabilitySchema {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "gradient_accumulation".to_string(),
            ParameterSpec { param_type: ParameterType::Int, min: None, max: None, step: None, options: None, default: None, wired: false, reason: Some("not yet supported by this backend".into()) },
        );
        parameters.insert(
            "learning_rate".to_string(),
            ParameterSpec { param_type: ParameterType::Float, min: Some(0.0), max: Some(1.0), step: None, options: None, default: None, wired: true, reason: None },
        );
        parameters.insert(
            "precision".to_string(),
            ParameterSpec { param_type: ParameterType::Enum, min: None, max: None, step: None, options: Some(vec!["fp16".into(), "bf16".into()]), default: None, wired: true, reason: None },
        );
        parameters.insert(
            "resume".to_string(),
            ParameterSpec { param_type: ParameterType::Bool, min: None, max: None, step: None, options: None, default: None, wired: true, reason: None },
        );

        let mut toggles = BTreeMap::new();
        toggles.insert("use_captioning".to_string(), ToggleSpec { supported: true, reason: None });
        toggles.insert("use_ema".to_string(), ToggleSpec { supported: false, reason: Some("requires more VRAM than available".into()) });

        CapabilitySchema { method: "lora".into(), variants: vec!["sdxl".into()], toggles, parameters }
    }

    #[test]
    fn unwired_parameter_is_rejected_with_reason() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "gradient_accumulation": 2 }));
        assert!(!result.is_valid());
        assert_eq!(result.rejected[0].reason, "not yet supported by this backend");
    }

    #[test]
    fn wired_parameter_within_bounds_is_accepted() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "learning_rate": 0.0005 }));
        assert!(result.is_valid());
        assert_eq!(result.accepted, vec!["learning_rate"]);
    }

    #[test]
    fn numeric_parameter_out_of_bounds_is_rejected() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "learning_rate": 5.0 }));
        assert!(!result.is_valid());
        assert!(result.rejected[0].reason.contains("<= 1"));
    }

    #[test]
    fn enum_parameter_not_in_options_is_rejected() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "precision": "fp8" }));
        assert!(!result.is_valid());
    }

    #[test]
    fn bool_parameter_wrong_type_is_rejected() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "resume": "yes" }));
        assert!(!result.is_valid());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let result = validate_parameters(&schema(), &serde_json::json!({ "totally_unknown": 123 }));
        assert!(result.is_valid());
        assert!(result.accepted.is_empty());
    }

    #[test]
    fn truthy_supported_toggle_is_accepted() {
        let result = validate_toggles(&schema(), &serde_json::json!({ "use_captioning": true }));
        assert!(result.is_valid());
    }

    #[test]
    fn truthy_unsupported_toggle_is_rejected_with_reason() {
        let result = validate_toggles(&schema(), &serde_json::json!({ "use_ema": true }));
        assert!(!result.is_valid());
        assert_eq!(result.rejected[0].reason, "requires more VRAM than available");
    }

    #[test]
    fn falsy_toggle_is_not_checked() {
        let result = validate_toggles(&schema(), &serde_json::json!({ "use_ema": false }));
        assert!(result.is_valid());
    }

    #[test]
    fn validate_or_reject_surfaces_plugin_reason() {
        let err = validate_or_reject(&schema(), &serde_json::json!({ "gradient_accumulation": 2 })).unwrap_err();
        match err.kind {
            op_core::OpErrorKind::ValidationRejected { reason } => {
                assert!(reason.contains("not yet supported by this backend"));
            }
            other => panic!("expected ValidationRejected, got {other:?}"),
        }
    }

    #[test]
    fn validate_or_reject_accepts_clean_submission() {
        assert!(validate_or_reject(&schema(), &serde_json::json!({ "learning_rate": 0.001 })).is_ok());
    }
}
