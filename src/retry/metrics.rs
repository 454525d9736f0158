//! Telemetry contract for retry sequences.
//!
//! A transport-bound reporter (for example an OpenTelemetry meter) lives
//! outside this crate and should emit:
//!
//! - `retry_attempts_total` (counter) — labels: `policy`
//! - `retry_attempts_success_total` (counter) — labels: `policy`
//! - `retry_attempts_failure_total` (counter) — labels: `policy`, `reason`
//!   (`error`, `timeout`, `canceled`, `result`), `retryable`
//! - `retry_attempts_duration_milliseconds` (histogram) — labels: `policy`,
//!   `status`
//! - `retry_attempts_buckets` (histogram of attempt counts) — labels: `policy`
//! - `retry_outcome_total` (counter) — labels: `policy`
//! - `retry_outcome_success_total` (counter) — labels: `policy`
//! - `retry_outcome_failure_total` (counter) — labels: `policy`, `reason`
//!   (`exhausted`, `timeout`, `canceled`, `non_retryable`)
//! - `retry_outcome_duration_milliseconds` (histogram) — labels: `policy`,
//!   `status`
//! - `retry_backoff_duration_milliseconds` (histogram) — labels: `policy`

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Status of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Error,
}

impl AttemptStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Error => "error",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Why one attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailureReason {
    /// The operation returned an error.
    Error,
    /// The per-attempt deadline fired.
    Timeout,
    /// The caller's scope was cancelled.
    Canceled,
    /// The result predicate selected a retry.
    Result,
}

impl AttemptFailureReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptFailureReason::Error => "error",
            AttemptFailureReason::Timeout => "timeout",
            AttemptFailureReason::Canceled => "canceled",
            AttemptFailureReason::Result => "result",
        }
    }
}

impl fmt::Display for AttemptFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Final status of a whole retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Error,
}

impl OutcomeStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Why a whole retry sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeFailureReason {
    /// Every permitted attempt was used.
    Exhausted,
    /// The caller's deadline fired during the sequence.
    Timeout,
    /// The caller's scope was cancelled during the sequence.
    Canceled,
    /// The last attempt's failure was classified non-retryable.
    NonRetryable,
}

impl OutcomeFailureReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            OutcomeFailureReason::Exhausted => "exhausted",
            OutcomeFailureReason::Timeout => "timeout",
            OutcomeFailureReason::Canceled => "canceled",
            OutcomeFailureReason::NonRetryable => "non_retryable",
        }
    }
}

impl fmt::Display for OutcomeFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Record of one invocation of the user operation within a sequence.
///
/// Surfaced both to the reporter and, for failed attempts, inside
/// [`RetryError`](crate::retry::error::RetryError). The error is stored
/// type-erased; match on it with `downcast_ref` when the concrete type is
/// needed.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub policy: String,
    /// 1-based ordinal within the sequence.
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub status: AttemptStatus,
    pub failure_reason: Option<AttemptFailureReason>,
    pub error: Option<Arc<dyn std::error::Error + Send + Sync>>,
    pub retryable: bool,
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// Terminal record of one retry sequence.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub policy: String,
    pub total_attempts: u32,
    pub total_duration: Duration,
    pub status: OutcomeStatus,
    pub failure_reason: Option<OutcomeFailureReason>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Retry instrumentation sink. Implementations must be safe for concurrent
/// use; one policy may drive sequences from many tasks at once.
pub trait RetryMetrics: Send + Sync {
    fn record_attempt(&self, attempt: &Attempt);

    fn record_outcome(&self, outcome: &Outcome);

    /// Called after the wait preceding `upcoming_attempt` has fully elapsed.
    fn record_backoff(&self, policy: &str, upcoming_attempt: u32, wait: Duration);
}

impl<M: RetryMetrics + ?Sized> RetryMetrics for Arc<M> {
    fn record_attempt(&self, attempt: &Attempt) {
        (**self).record_attempt(attempt);
    }

    fn record_outcome(&self, outcome: &Outcome) {
        (**self).record_outcome(outcome);
    }

    fn record_backoff(&self, policy: &str, upcoming_attempt: u32, wait: Duration) {
        (**self).record_backoff(policy, upcoming_attempt, wait);
    }
}

impl<M: RetryMetrics + ?Sized> RetryMetrics for Box<M> {
    fn record_attempt(&self, attempt: &Attempt) {
        (**self).record_attempt(attempt);
    }

    fn record_outcome(&self, outcome: &Outcome) {
        (**self).record_outcome(outcome);
    }

    fn record_backoff(&self, policy: &str, upcoming_attempt: u32, wait: Duration) {
        (**self).record_backoff(policy, upcoming_attempt, wait);
    }
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetryMetrics;

impl RetryMetrics for NoopRetryMetrics {
    fn record_attempt(&self, _attempt: &Attempt) {}

    fn record_outcome(&self, _outcome: &Outcome) {}

    fn record_backoff(&self, _policy: &str, _upcoming_attempt: u32, _wait: Duration) {}
}

/// Atomic-counter reporter for tests.
#[derive(Debug, Default)]
pub struct InMemoryRetryMetrics {
    attempts_total: AtomicU64,
    attempts_success: AtomicU64,
    attempts_failure: AtomicU64,
    attempts_duration_ms: AtomicU64,
    outcome_total: AtomicU64,
    outcome_success: AtomicU64,
    outcome_failure: AtomicU64,
    outcome_duration_ms: AtomicU64,
    backoff_total: AtomicU64,
    backoff_duration_ms: AtomicU64,
}

/// Point-in-time view of [`InMemoryRetryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrySnapshot {
    pub attempts_total: u64,
    pub attempts_success: u64,
    pub attempts_failure: u64,
    pub attempts_duration_ms: u64,
    pub outcome_total: u64,
    pub outcome_success: u64,
    pub outcome_failure: u64,
    pub outcome_duration_ms: u64,
    pub backoff_total: u64,
    pub backoff_duration_ms: u64,
}

impl InMemoryRetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        RetrySnapshot {
            attempts_total: self.attempts_total.load(Ordering::SeqCst),
            attempts_success: self.attempts_success.load(Ordering::SeqCst),
            attempts_failure: self.attempts_failure.load(Ordering::SeqCst),
            attempts_duration_ms: self.attempts_duration_ms.load(Ordering::SeqCst),
            outcome_total: self.outcome_total.load(Ordering::SeqCst),
            outcome_success: self.outcome_success.load(Ordering::SeqCst),
            outcome_failure: self.outcome_failure.load(Ordering::SeqCst),
            outcome_duration_ms: self.outcome_duration_ms.load(Ordering::SeqCst),
            backoff_total: self.backoff_total.load(Ordering::SeqCst),
            backoff_duration_ms: self.backoff_duration_ms.load(Ordering::SeqCst),
        }
    }
}

impl RetryMetrics for InMemoryRetryMetrics {
    fn record_attempt(&self, attempt: &Attempt) {
        self.attempts_total.fetch_add(1, Ordering::SeqCst);
        if attempt.is_success() {
            self.attempts_success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.attempts_failure.fetch_add(1, Ordering::SeqCst);
        }
        self.attempts_duration_ms
            .fetch_add(attempt.duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_outcome(&self, outcome: &Outcome) {
        self.outcome_total.fetch_add(1, Ordering::SeqCst);
        if outcome.is_success() {
            self.outcome_success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.outcome_failure.fetch_add(1, Ordering::SeqCst);
        }
        self.outcome_duration_ms
            .fetch_add(outcome.total_duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_backoff(&self, _policy: &str, _upcoming_attempt: u32, wait: Duration) {
        self.backoff_total.fetch_add(1, Ordering::SeqCst);
        self.backoff_duration_ms
            .fetch_add(wait.as_millis() as u64, Ordering::SeqCst);
    }
}

static GLOBAL: ArcSwapOption<Box<dyn RetryMetrics>> = ArcSwapOption::const_empty();
static NOOP: OnceLock<Arc<dyn RetryMetrics>> = OnceLock::new();

/// Install the process-wide retry reporter used by policies built without
/// their own.
pub fn set_global_metrics(metrics: impl RetryMetrics + 'static) {
    let boxed: Box<dyn RetryMetrics> = Box::new(metrics);
    GLOBAL.store(Some(Arc::new(boxed)));
}

/// Drop the process-wide reporter; policies fall back to the no-op one.
pub fn clear_global_metrics() {
    GLOBAL.store(None);
}

pub(crate) fn global() -> Arc<dyn RetryMetrics> {
    if let Some(metrics) = GLOBAL.load_full() {
        return metrics;
    }
    NOOP.get_or_init(|| Arc::new(NoopRetryMetrics)).clone()
}
