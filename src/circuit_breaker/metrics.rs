//! Reporter contract for circuit breaker instrumentation.
//!
//! A transport-bound reporter (for example an OpenTelemetry meter) lives
//! outside this crate and should emit:
//!
//! - `circuitbreaker_calls_total` (counter) — permitted calls;
//!   labels: `name`, `outcome` (`success`, `failure`, `slow_success`,
//!   `slow_failure`)
//! - `circuitbreaker_calls_duration_milliseconds` (histogram) — call
//!   durations; labels: `name`, `outcome`
//! - `circuitbreaker_rejections_total` (counter) — rejected calls;
//!   labels: `name`, `state` (`open`, `half_open`)
//! - `circuitbreaker_state_transitions_total` (counter) — labels: `name`,
//!   `from_state`, `to_state`
//! - `circuitbreaker_state` (gauge, 1 for the current state, 0 otherwise) —
//!   labels: `name`, `state`
//! - `circuitbreaker_failure_rate` (gauge, percent) — labels: `name`
//! - `circuitbreaker_slow_call_rate` (gauge, percent) — labels: `name`

use super::window::{CallOutcome, CallRates};
use super::State;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// A state change of one breaker instance.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub name: String,
    pub from: State,
    pub to: State,
    pub at: DateTime<Utc>,
}

/// One permitted call that ran to completion.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub name: String,
    pub outcome: CallOutcome,
    pub duration: Duration,
}

/// One call denied admission.
#[derive(Debug, Clone)]
pub struct CallRejection {
    pub name: String,
    pub state: State,
}

/// Breaker instrumentation sink. Implementations must be safe for concurrent
/// use; calls arrive from every task sharing a breaker.
pub trait BreakerMetrics: Send + Sync {
    fn record_state_transition(&self, transition: &StateTransition);

    fn record_call_result(&self, result: &CallResult);

    fn record_call_rejection(&self, rejection: &CallRejection);

    /// Current window statistics. Exposed for reporters that sample rates;
    /// the state machine does not invoke it on its own.
    fn record_call_rates(&self, name: &str, rates: &CallRates);
}

impl<M: BreakerMetrics + ?Sized> BreakerMetrics for Arc<M> {
    fn record_state_transition(&self, transition: &StateTransition) {
        (**self).record_state_transition(transition);
    }

    fn record_call_result(&self, result: &CallResult) {
        (**self).record_call_result(result);
    }

    fn record_call_rejection(&self, rejection: &CallRejection) {
        (**self).record_call_rejection(rejection);
    }

    fn record_call_rates(&self, name: &str, rates: &CallRates) {
        (**self).record_call_rates(name, rates);
    }
}

impl<M: BreakerMetrics + ?Sized> BreakerMetrics for Box<M> {
    fn record_state_transition(&self, transition: &StateTransition) {
        (**self).record_state_transition(transition);
    }

    fn record_call_result(&self, result: &CallResult) {
        (**self).record_call_result(result);
    }

    fn record_call_rejection(&self, rejection: &CallRejection) {
        (**self).record_call_rejection(rejection);
    }

    fn record_call_rates(&self, name: &str, rates: &CallRates) {
        (**self).record_call_rates(name, rates);
    }
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBreakerMetrics;

impl BreakerMetrics for NoopBreakerMetrics {
    fn record_state_transition(&self, _transition: &StateTransition) {}

    fn record_call_result(&self, _result: &CallResult) {}

    fn record_call_rejection(&self, _rejection: &CallRejection) {}

    fn record_call_rates(&self, _name: &str, _rates: &CallRates) {}
}

/// Atomic-counter reporter for tests.
#[derive(Debug, Default)]
pub struct InMemoryBreakerMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    slow_success: AtomicU64,
    slow_failure: AtomicU64,
    rejections: AtomicU64,
    transitions: AtomicU64,
}

/// Point-in-time view of [`InMemoryBreakerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakerSnapshot {
    pub success: u64,
    pub failure: u64,
    pub slow_success: u64,
    pub slow_failure: u64,
    pub rejections: u64,
    pub transitions: u64,
}

impl BreakerSnapshot {
    pub fn calls_total(&self) -> u64 {
        self.success + self.failure + self.slow_success + self.slow_failure
    }
}

impl InMemoryBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            success: self.success.load(Ordering::SeqCst),
            failure: self.failure.load(Ordering::SeqCst),
            slow_success: self.slow_success.load(Ordering::SeqCst),
            slow_failure: self.slow_failure.load(Ordering::SeqCst),
            rejections: self.rejections.load(Ordering::SeqCst),
            transitions: self.transitions.load(Ordering::SeqCst),
        }
    }
}

impl BreakerMetrics for InMemoryBreakerMetrics {
    fn record_state_transition(&self, _transition: &StateTransition) {
        self.transitions.fetch_add(1, Ordering::SeqCst);
    }

    fn record_call_result(&self, result: &CallResult) {
        let counter = match result.outcome {
            CallOutcome::Success => &self.success,
            CallOutcome::Failure => &self.failure,
            CallOutcome::SlowSuccess => &self.slow_success,
            CallOutcome::SlowFailure => &self.slow_failure,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn record_call_rejection(&self, _rejection: &CallRejection) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }

    fn record_call_rates(&self, _name: &str, _rates: &CallRates) {}
}

static GLOBAL: ArcSwapOption<Box<dyn BreakerMetrics>> = ArcSwapOption::const_empty();
static NOOP: OnceLock<Arc<dyn BreakerMetrics>> = OnceLock::new();

/// Install the process-wide breaker reporter used by breakers built without
/// their own.
pub fn set_global_metrics(metrics: impl BreakerMetrics + 'static) {
    let boxed: Box<dyn BreakerMetrics> = Box::new(metrics);
    GLOBAL.store(Some(Arc::new(boxed)));
}

/// Drop the process-wide reporter; breakers fall back to the no-op one.
pub fn clear_global_metrics() {
    GLOBAL.store(None);
}

pub(crate) fn global() -> Arc<dyn BreakerMetrics> {
    if let Some(metrics) = GLOBAL.load_full() {
        return metrics;
    }
    NOOP.get_or_init(|| Arc::new(NoopBreakerMetrics)).clone()
}
