use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Overall resource limits for a session: wall-clock time and the number of
/// calls made to external collaborators (dispatch, poll, refresh, test runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_duration_secs: u64,
    pub max_external_calls: u64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_duration_secs: 4 * 60 * 60,
            max_external_calls: 10_000,
        }
    }
}

/// Live budget accounting. When the budget is exceeded mid-group, no further
/// undispatched tasks are started; when it is only approaching its limit but
/// estimated completion is high, the current group is allowed to finish.
#[derive(Debug)]
pub struct BudgetTracker {
    budget: ResourceBudget,
    started: Instant,
    external_calls: u64,
}

/// Fraction of either limit at which the budget counts as "approaching".
const APPROACHING_FRACTION: f64 = 0.9;

/// Estimated-completion threshold that lets a nearly-done plan finish its
/// current group despite an approaching budget.
const FINISH_ANYWAY_COMPLETION_PCT: u8 = 80;

impl BudgetTracker {
    pub fn new(budget: ResourceBudget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            external_calls: 0,
        }
    }

    pub fn record_call(&mut self) {
        self.external_calls += 1;
    }

    pub fn external_calls(&self) -> u64 {
        self.external_calls
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn exceeded(&self) -> bool {
        self.elapsed() >= Duration::from_secs(self.budget.max_duration_secs)
            || self.external_calls >= self.budget.max_external_calls
    }

    pub fn approaching(&self) -> bool {
        let time_fraction =
            self.elapsed().as_secs_f64() / (self.budget.max_duration_secs.max(1) as f64);
        let call_fraction = self.external_calls as f64 / (self.budget.max_external_calls.max(1) as f64);
        time_fraction >= APPROACHING_FRACTION || call_fraction >= APPROACHING_FRACTION
    }

    /// Whether the coordinator should stop before starting more work, given
    /// how far through the plan it estimates itself to be.
    pub fn should_stop(&self, estimated_completion_pct: u8) -> bool {
        if self.exceeded() {
            return true;
        }
        self.approaching() && estimated_completion_pct < FINISH_ANYWAY_COMPLETION_PCT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_limited(max_calls: u64) -> BudgetTracker {
        BudgetTracker::new(ResourceBudget {
            max_duration_secs: 3_600,
            max_external_calls: max_calls,
        })
    }

    #[test]
    fn fresh_tracker_is_within_budget() {
        let tracker = call_limited(100);
        assert!(!tracker.exceeded());
        assert!(!tracker.approaching());
        assert!(!tracker.should_stop(0));
    }

    #[test]
    fn call_limit_exceeds_the_budget() {
        let mut tracker = call_limited(3);
        for _ in 0..3 {
            tracker.record_call();
        }
        assert!(tracker.exceeded());
        assert!(tracker.should_stop(100));
    }

    #[test]
    fn approaching_budget_lets_a_nearly_done_plan_continue() {
        let mut tracker = call_limited(10);
        for _ in 0..9 {
            tracker.record_call();
        }
        assert!(tracker.approaching());
        assert!(!tracker.exceeded());
        assert!(tracker.should_stop(50));
        assert!(!tracker.should_stop(85));
    }
}
