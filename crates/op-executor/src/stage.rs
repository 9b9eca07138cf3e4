// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution stage machine (spec §4.5 "Execution stage machine").
//!
//! Represented as a tagged enum per the Design Notes ("represent as tagged
//! enum; reject illegal transitions"): [`op_core::TrainingStage`] is the
//! tag, this module is the transition table.

use op_core::TrainingStage;
use thiserror::Error;

/// An attempted stage transition that the machine does not allow.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal stage transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// The stage the job was in.
    pub from: TrainingStage,
    /// The stage the executor tried to move it to.
    pub to: TrainingStage,
}

/// Checks `from -> to` against the stage diagram:
///
/// ```text
/// queued -> initializing -> preparing_dataset -> training -> exporting -> completed
///                        \-> captioning ------/           \-> sampling -/
///                                                          \-> failed
///                          (any non-terminal) -------------------------> cancelled
/// ```
///
/// `failed` and `cancelled` are reachable from any non-terminal stage;
/// nothing is reachable from a terminal stage (an executor that calls this
/// on an already-terminal job has a bug, and gets told so rather than
/// silently allowed).
pub fn validate_transition(from: TrainingStage, to: TrainingStage) -> Result<(), IllegalTransition> {
    use TrainingStage::*;

    if from.is_terminal() {
        return Err(IllegalTransition { from, to });
    }
    if matches!(to, Failed | Cancelled) {
        return Ok(());
    }

    let allowed = matches!(
        (from, to),
        (Queued, Initializing)
            | (Initializing, PreparingDataset)
            // Generation jobs have no dataset to prepare and skip straight
            // to `training` (used there as "generating").
            | (Initializing, Training)
            | (PreparingDataset, Captioning)
            | (PreparingDataset, Training)
            | (Captioning, Training)
            | (Training, Sampling)
            | (Training, Exporting)
            | (Sampling, Exporting)
            | (Exporting, Completed)
    );

    if allowed {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrainingStage::*;

    #[test]
    fn happy_path_with_optional_stages_is_allowed() {
        let path = [Queued, Initializing, PreparingDataset, Captioning, Training, Sampling, Exporting, Completed];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn happy_path_skipping_optional_stages_is_allowed() {
        let path = [Queued, Initializing, PreparingDataset, Training, Exporting, Completed];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn generation_jobs_skip_dataset_preparation_entirely() {
        let path = [Queued, Initializing, Training, Exporting, Completed];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn cancelled_is_reachable_from_any_non_terminal_stage() {
        for stage in [Queued, Initializing, PreparingDataset, Captioning, Training, Sampling, Exporting] {
            validate_transition(stage, Cancelled).unwrap();
        }
    }

    #[test]
    fn failed_is_reachable_from_any_non_terminal_stage() {
        for stage in [Queued, Initializing, PreparingDataset, Captioning, Training, Sampling, Exporting] {
            validate_transition(stage, Failed).unwrap();
        }
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        assert!(validate_transition(Queued, Training).is_err());
        assert!(validate_transition(Initializing, Completed).is_err());
    }

    #[test]
    fn moving_out_of_a_terminal_stage_is_rejected() {
        assert!(validate_transition(Completed, Exporting).is_err());
        assert!(validate_transition(Failed, Cancelled).is_err());
        assert!(validate_transition(Cancelled, Queued).is_err());
    }

    #[test]
    fn going_backwards_is_rejected() {
        assert!(validate_transition(Training, PreparingDataset).is_err());
        assert!(validate_transition(Exporting, Training).is_err());
    }
}
