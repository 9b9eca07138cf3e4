// SPDX-License-Identifier: MIT OR Apache-2.0
//! Known-marker parsing for plugin subprocess stdout/stderr (spec §4.5
//! "Subprocess output capture").
//!
//! A plugin that shells out to a training script may not call the progress
//! callback directly; the executor keeps the stage machine advancing by
//! scraping the same markers the script prints to its own console.

use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    step: Regex,
    tqdm: Regex,
    fraction: Regex,
    loss: Regex,
    lr: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        step: Regex::new(r"(?i)step[:\s]+(\d+)[/\s]+(\d+)").unwrap(),
        tqdm: Regex::new(r"(\d+)%\|[^|]*\|\s*(\d+)/(\d+)").unwrap(),
        fraction: Regex::new(r"[\s|](\d+)/(\d+)[\s|\[]").unwrap(),
        loss: Regex::new(r"(?i)loss[:\s]+([0-9.]+)").unwrap(),
        lr: Regex::new(r"(?i)lr[:\s]+([0-9.eE-]+)").unwrap(),
    })
}

/// What a single output line yielded, each field independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedMarkers {
    /// `(step, total)`, if a step-like marker matched.
    pub step: Option<(u64, u64)>,
    /// Most recent loss value on this line.
    pub loss: Option<f64>,
    /// Most recent learning rate value on this line.
    pub lr: Option<f64>,
}

/// Scans one line of subprocess output for the known progress markers,
/// trying `step N/M` first, then tqdm's `NN%|bar| N/M`, then a bare `N/M`
/// fraction (accepted only when `total` looks like a step count rather than
/// an incidental ratio elsewhere in the line — within 2x of `expected_total`
/// and greater than 50, matching the source script's own sanity bound).
pub fn parse_line(line: &str, expected_total: u64) -> ParsedMarkers {
    let p = patterns();
    let mut out = ParsedMarkers::default();

    if let Some(caps) = p.step.captures(line) {
        out.step = parse_pair(&caps);
    } else if let Some(caps) = p.tqdm.captures(line) {
        out.step = caps[2].parse().ok().zip(caps[3].parse().ok());
    } else if let Some(caps) = p.fraction.captures(line) {
        if let (Ok(step), Ok(total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
            if total > 50 && total <= expected_total.saturating_mul(2) {
                out.step = Some((step, total));
            }
        }
    }

    if let Some(caps) = p.loss.captures(line) {
        out.loss = caps[1].parse().ok();
    }
    if let Some(caps) = p.lr.captures(line) {
        out.lr = caps[1].parse().ok();
    }

    out
}

fn parse_pair(caps: &regex::Captures<'_>) -> Option<(u64, u64)> {
    caps[1].parse().ok().zip(caps[2].parse().ok())
}

/// Tracks the running step/total/loss/lr seen across a subprocess's output,
/// enforcing that the step counter never regresses (spec: "apparent
/// regressions are ignored").
#[derive(Debug, Clone, Default)]
pub struct MarkerTracker {
    step: u64,
    total: u64,
    loss: Option<f64>,
    lr: Option<f64>,
}

impl MarkerTracker {
    /// Starts tracking against an initial expected total step count.
    pub fn new(total: u64) -> Self {
        Self { step: 0, total, loss: None, lr: None }
    }

    /// Feeds one line of output, updating internal state and reporting
    /// whether the visible step actually advanced.
    pub fn feed(&mut self, line: &str) -> bool {
        let markers = parse_line(line, self.total);
        let mut advanced = false;

        if let Some((step, total)) = markers.step {
            if step >= self.step {
                advanced = step > self.step;
                self.step = step;
                if total > 0 && total != self.total {
                    self.total = total;
                }
            }
        }
        if markers.loss.is_some() {
            self.loss = markers.loss;
        }
        if markers.lr.is_some() {
            self.lr = markers.lr;
        }

        advanced
    }

    /// Current step, total, loss, lr.
    pub fn snapshot(&self) -> (u64, u64, Option<f64>, Option<f64>) {
        (self.step, self.total, self.loss, self.lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_step_pattern_is_preferred() {
        let markers = parse_line("step: 42/1000 loss: 0.512", 1000);
        assert_eq!(markers.step, Some((42, 1000)));
        assert_eq!(markers.loss, Some(0.512));
    }

    #[test]
    fn tqdm_pattern_is_used_when_step_pattern_absent() {
        let markers = parse_line("50%|#####     | 500/1000 [00:10<00:10]", 1000);
        assert_eq!(markers.step, Some((500, 1000)));
    }

    #[test]
    fn bare_fraction_is_accepted_within_sanity_bound() {
        let markers = parse_line("epoch 1 | 120/1000 done", 1000);
        assert_eq!(markers.step, Some((120, 1000)));
    }

    #[test]
    fn bare_fraction_below_fifty_total_is_rejected() {
        let markers = parse_line("batch 2/10", 1000);
        assert_eq!(markers.step, None);
    }

    #[test]
    fn bare_fraction_wildly_above_expected_total_is_rejected() {
        let markers = parse_line("downloaded 900000/5000000 bytes", 1000);
        assert_eq!(markers.step, None);
    }

    #[test]
    fn learning_rate_marker_is_parsed() {
        let markers = parse_line("lr: 1e-4", 1000);
        assert_eq!(markers.lr, Some(1e-4));
    }

    #[test]
    fn tracker_ignores_step_regressions() {
        let mut tracker = MarkerTracker::new(1000);
        assert!(tracker.feed("step: 100/1000"));
        assert!(!tracker.feed("step: 40/1000"));
        assert_eq!(tracker.snapshot().0, 100);
    }

    #[test]
    fn tracker_updates_total_when_script_revises_it() {
        let mut tracker = MarkerTracker::new(1000);
        tracker.feed("step: 10/1200");
        assert_eq!(tracker.snapshot().1, 1200);
    }

    #[test]
    fn tracker_retains_last_loss_across_lines_without_one() {
        let mut tracker = MarkerTracker::new(1000);
        tracker.feed("step: 10/1000 loss: 0.9");
        tracker.feed("step: 11/1000");
        assert_eq!(tracker.snapshot().2, Some(0.9));
    }

    #[test]
    fn equal_step_is_not_reported_as_advanced() {
        let mut tracker = MarkerTracker::new(1000);
        tracker.feed("step: 10/1000");
        assert!(!tracker.feed("step: 10/1000"));
    }
}
