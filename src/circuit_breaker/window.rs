//! Count-based sliding window over recent call outcomes.
//!
//! The window is not synchronized; the breaker serializes access under its
//! own lock.

use std::fmt;

/// Classification of one completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    SlowSuccess,
    SlowFailure,
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failure | CallOutcome::SlowFailure)
    }

    pub fn is_slow(&self) -> bool {
        matches!(self, CallOutcome::SlowSuccess | CallOutcome::SlowFailure)
    }

    /// Metric label form.
    pub fn as_label(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::SlowSuccess => "slow_success",
            CallOutcome::SlowFailure => "slow_failure",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Rates over the currently recorded calls, as percentages in `[0, 100]`.
/// All zero while the window is empty.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CallRates {
    pub total: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub slow_rate: f64,
}

/// Bounded collection of recent outcomes feeding threshold evaluation.
pub trait Window: Send + fmt::Debug {
    /// Number of recorded calls, at most the capacity.
    fn size(&self) -> usize;

    fn record(&mut self, outcome: CallOutcome);

    fn rates(&self) -> CallRates;

    /// Drop all recorded outcomes, keeping the capacity.
    fn reset(&mut self);
}

/// Fixed-capacity ring of the last N outcomes with running counters.
#[derive(Debug)]
pub struct CountWindow {
    slots: Vec<Option<CallOutcome>>,
    cursor: usize,
    success: usize,
    failure: usize,
    slow: usize,
}

impl CountWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            slots: vec![None; capacity],
            cursor: 0,
            success: 0,
            failure: 0,
            slow: 0,
        }
    }

    fn count(&mut self, outcome: CallOutcome) {
        if outcome.is_failure() {
            self.failure += 1;
        } else {
            self.success += 1;
        }
        if outcome.is_slow() {
            self.slow += 1;
        }
    }

    fn forget(&mut self, outcome: CallOutcome) {
        if outcome.is_failure() {
            self.failure -= 1;
        } else {
            self.success -= 1;
        }
        if outcome.is_slow() {
            self.slow -= 1;
        }
    }
}

impl Window for CountWindow {
    fn size(&self) -> usize {
        self.success + self.failure
    }

    fn record(&mut self, outcome: CallOutcome) {
        if let Some(evicted) = self.slots[self.cursor].take() {
            self.forget(evicted);
        }
        self.slots[self.cursor] = Some(outcome);
        self.count(outcome);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    fn rates(&self) -> CallRates {
        let total = self.size();
        if total == 0 {
            return CallRates::default();
        }

        CallRates {
            total,
            success_rate: self.success as f64 / total as f64 * 100.0,
            failure_rate: self.failure as f64 / total as f64 * 100.0,
            slow_rate: self.slow as f64 / total as f64 * 100.0,
        }
    }

    fn reset(&mut self) {
        self.slots = vec![None; self.slots.len()];
        self.cursor = 0;
        self.success = 0;
        self.failure = 0;
        self.slow = 0;
    }
}
