//! [`FailureStreak`] – repeated planning-failure detector.
//!
//! Planning failures never stop the pick-place loop, so a phase that can no
//! longer be planned (target out of reach, scene blocked) would otherwise
//! fail silently cycle after cycle.  The streak tracker counts consecutive
//! failures per phase and reports when a phase has failed `threshold` times
//! in a row, so the loop can raise an error-level log.  It never gates
//! execution.
//!
//! # Example
//!
//! ```rust
//! use harvest_runtime::failure_streak::FailureStreak;
//!
//! let mut streak = FailureStreak::new(3);
//!
//! assert!(!streak.record_failure("grasp_offset_1"));
//! assert!(!streak.record_failure("grasp_offset_1"));
//! assert!(streak.record_failure("grasp_offset_1")); // third in a row
//!
//! // A success clears that phase only.
//! streak.record_success("grasp_offset_1");
//! assert_eq!(streak.streak("grasp_offset_1"), 0);
//! ```

use std::collections::HashMap;

/// Consecutive-failure counter keyed by phase label.
#[derive(Debug, Clone)]
pub struct FailureStreak {
    /// Number of consecutive failures that counts as a streak.
    threshold: usize,
    counts: HashMap<String, usize>,
}

impl FailureStreak {
    /// `threshold` of 0 is treated as 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record a failure of `phase`.
    ///
    /// Returns `true` while the phase has failed at least `threshold` times
    /// in a row.
    pub fn record_failure(&mut self, phase: &str) -> bool {
        let count = self.counts.entry(phase.to_string()).or_insert(0);
        *count += 1;
        *count >= self.threshold
    }

    /// Record a success of `phase`, ending its streak.
    pub fn record_success(&mut self, phase: &str) {
        self.counts.remove(phase);
    }

    /// Current number of consecutive failures of `phase`.
    pub fn streak(&self, phase: &str) -> usize {
        self.counts.get(phase).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_trigger_below_threshold() {
        let mut streak = FailureStreak::new(4);
        assert!(!streak.record_failure("home"));
        assert!(!streak.record_failure("home"));
        assert!(!streak.record_failure("home"));
        assert_eq!(streak.streak("home"), 3);
    }

    #[test]
    fn keeps_reporting_after_threshold() {
        let mut streak = FailureStreak::new(2);
        streak.record_failure("retract");
        assert!(streak.record_failure("retract"));
        assert!(streak.record_failure("retract"));
    }

    #[test]
    fn phases_are_counted_independently() {
        let mut streak = FailureStreak::new(2);
        assert!(!streak.record_failure("home"));
        assert!(!streak.record_failure("retract"));
        assert!(streak.record_failure("home"));
        assert_eq!(streak.streak("retract"), 1);
    }

    #[test]
    fn success_breaks_only_its_own_streak() {
        let mut streak = FailureStreak::new(3);
        streak.record_failure("home");
        streak.record_failure("retract");
        streak.record_success("home");
        assert_eq!(streak.streak("home"), 0);
        assert_eq!(streak.streak("retract"), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut streak = FailureStreak::new(1);
        assert!(streak.record_failure("home"));
        streak.reset();
        assert_eq!(streak.streak("home"), 0);
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let mut streak = FailureStreak::new(0);
        assert_eq!(streak.threshold(), 1);
        assert!(streak.record_failure("home"));
    }
}
