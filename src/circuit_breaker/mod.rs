//! Circuit breaker gating calls by recent call statistics.
//!
//! A breaker tracks the outcomes of permitted calls in a sliding
//! [`Window`](window::Window) and trips open when the failure rate or the
//! slow-call rate over at least `minimum_calls` recorded calls reaches its
//! threshold. While open it rejects immediately; after the configured wait it
//! admits a limited number of half-open probe leases, and closes again only
//! if the probes stay under the thresholds.
//!
//! Breakers are local to the process and safe to share: one mutex serializes
//! the state machine and its window.

pub mod metrics;
pub mod window;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{match_kind, match_value, FaultError, FaultKind, FaultMatcher, PanicError};
use chrono::Utc;
use futures::FutureExt;
use metrics::{BreakerMetrics, CallRejection, CallResult, StateTransition};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use window::{CallOutcome, CountWindow, Window};

/// Breaker state.
///
/// `MetricsOnly` is a passive mode: every call is admitted and recorded, but
/// the machine never transitions and never rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
    MetricsOnly,
}

impl State {
    /// Metric label form.
    pub fn as_label(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::HalfOpen => "half_open",
            State::Open => "open",
            State::MetricsOnly => "metrics_only",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::HalfOpen => "HALF_OPEN",
            State::Open => "OPEN",
            State::MetricsOnly => "METRICS_ONLY",
        };
        f.write_str(name)
    }
}

/// Everything guarded by the breaker mutex.
struct Core {
    state: State,
    transitioned_at: u64,
    half_open_leases: usize,
    half_open_completed: usize,
    window: Box<dyn Window>,
}

/// Count-window circuit breaker for operations yielding `Result<T, E>`.
///
/// Built via [`CircuitBreaker::builder`]; construction is infallible and the
/// instance is shared behind an `Arc` by concurrent callers.
pub struct CircuitBreaker<T, E> {
    name: String,
    minimum_calls: usize,
    failure_rate_threshold: f64,
    slow_call_rate_threshold: f64,
    slow_call_duration_threshold: Duration,
    permitted_half_open_calls: usize,
    open_state_wait: Duration,
    fail_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    fail_on_error: Option<Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>>,
    fail_errors: Vec<FaultMatcher<E>>,
    ignore_errors: Vec<FaultMatcher<E>>,
    metrics: Option<Arc<dyn BreakerMetrics>>,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("minimum_calls", &self.minimum_calls)
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("slow_call_rate_threshold", &self.slow_call_rate_threshold)
            .finish_non_exhaustive()
    }
}

impl<T, E> CircuitBreaker<T, E> {
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder<T, E> {
        CircuitBreakerBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.core.lock().unwrap().state
    }

    /// Current window statistics.
    pub fn call_rates(&self) -> window::CallRates {
        self.core.lock().unwrap().window.rates()
    }

    fn reporter(&self) -> Arc<dyn BreakerMetrics> {
        self.metrics.clone().unwrap_or_else(metrics::global)
    }

    /// Move to `next`, seeding half-open lease accounting and clearing the
    /// window. No-op when already in `next`.
    fn shift(&self, core: &mut Core, next: State) -> Option<StateTransition> {
        if core.state == next {
            return None;
        }

        let from = core.state;
        if next == State::HalfOpen {
            core.half_open_leases = self.permitted_half_open_calls;
            core.half_open_completed = 0;
        }
        core.state = next;
        core.transitioned_at = self.clock.now_millis();
        core.window.reset();

        if next == State::Open {
            tracing::warn!(breaker = %self.name, from = %from, "circuit breaker opened");
        } else {
            tracing::info!(breaker = %self.name, from = %from, to = %next, "circuit breaker state change");
        }

        Some(StateTransition { name: self.name.clone(), from, to: next, at: Utc::now() })
    }

    fn thresholds_exceeded(&self, core: &Core) -> bool {
        let rates = core.window.rates();
        rates.failure_rate >= self.failure_rate_threshold
            || rates.slow_rate >= self.slow_call_rate_threshold
    }

    fn evaluate(&self, core: &mut Core) -> Option<StateTransition> {
        match core.state {
            State::Closed => {
                if core.window.size() >= self.minimum_calls && self.thresholds_exceeded(core) {
                    return self.shift(core, State::Open);
                }
            }
            State::HalfOpen => {
                if core.half_open_completed >= self.permitted_half_open_calls {
                    let next = if self.thresholds_exceeded(core) {
                        State::Open
                    } else {
                        State::Closed
                    };
                    return self.shift(core, next);
                }
            }
            _ => {}
        }
        None
    }

    /// Admission hook. Returns a rejection sentinel when the call may not run.
    fn admit(&self) -> Result<(), FaultError<E>> {
        let (transition, rejected) = {
            let mut core = self.core.lock().unwrap();

            let mut transition = None;
            if core.state == State::Open {
                let elapsed = self.clock.now_millis().saturating_sub(core.transitioned_at);
                if elapsed >= self.open_state_wait.as_millis() as u64 {
                    transition = self.shift(&mut core, State::HalfOpen);
                }
            }

            let rejected = match core.state {
                State::Open => Some((State::Open, FaultError::CircuitOpen)),
                State::HalfOpen => {
                    if core.half_open_leases == 0 {
                        Some((State::HalfOpen, FaultError::CircuitHalfOpen))
                    } else {
                        core.half_open_leases -= 1;
                        None
                    }
                }
                _ => None,
            };

            (transition, rejected)
        };

        let reporter = self.reporter();
        if let Some(transition) = &transition {
            reporter.record_state_transition(transition);
        }

        match rejected {
            Some((state, err)) => {
                reporter.record_call_rejection(&CallRejection { name: self.name.clone(), state });
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Completion hook: classify, record into the window, account half-open
    /// leases, and evaluate transitions.
    fn observe(&self, result: Result<&T, &FaultError<E>>, duration: Duration) {
        let is_failure = self.should_fail_call(result);
        let is_slow = duration >= self.slow_call_duration_threshold;
        let outcome = match (is_failure, is_slow) {
            (true, true) => CallOutcome::SlowFailure,
            (true, false) => CallOutcome::Failure,
            (false, true) => CallOutcome::SlowSuccess,
            (false, false) => CallOutcome::Success,
        };

        let transition = {
            let mut core = self.core.lock().unwrap();
            core.window.record(outcome);

            let completed_a_lease = core.state == State::HalfOpen
                && !result.err().is_some_and(|e| e.is_rejection());
            if completed_a_lease {
                core.half_open_completed += 1;
            }

            self.evaluate(&mut core)
        };

        let reporter = self.reporter();
        if let Some(transition) = &transition {
            reporter.record_state_transition(transition);
        }
        reporter.record_call_result(&CallResult {
            name: self.name.clone(),
            outcome,
            duration,
        });
    }

    /// Failure classification of one completed call.
    ///
    /// With an error present: the error predicate (true means fail) wins,
    /// then the fail list, then the ignore list, and a bare error fails.
    /// Without an error, the result predicate decides (default: success).
    fn should_fail_call(&self, result: Result<&T, &FaultError<E>>) -> bool {
        match result {
            Err(err) => {
                if let Some(predicate) = &self.fail_on_error {
                    if predicate(err) {
                        return true;
                    }
                }
                if self.fail_errors.iter().any(|matcher| matcher(err)) {
                    return true;
                }
                if self.ignore_errors.iter().any(|matcher| matcher(err)) {
                    return false;
                }
                true
            }
            Ok(value) => self
                .fail_on_result
                .as_ref()
                .is_some_and(|predicate| predicate(value)),
        }
    }

    /// Run `op` under this breaker.
    ///
    /// Rejections surface without invoking `op`. A panicking `op` is trapped
    /// into [`FaultError::Panic`] and still recorded as a completed call, as
    /// is a call short-circuited by an already-cancelled `cancel` token.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, FaultError<E>>
    where
        T: Send,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, FaultError<E>>> + Send,
    {
        self.admit()?;

        let start = Instant::now();
        let result = if cancel.is_cancelled() {
            Err(FaultError::Canceled)
        } else {
            match AssertUnwindSafe(op(cancel.clone())).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(FaultError::Panic(PanicError::from_payload(payload))),
            }
        };

        self.observe(result.as_ref(), start.elapsed());
        result
    }

    /// [`execute`](CircuitBreaker::execute) for operations returning the
    /// plain error type.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, FaultError<E>>
    where
        T: Send,
        E: Send,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.execute(cancel, |scope| async move {
            op(scope).await.map_err(FaultError::Inner)
        })
        .await
    }
}

/// Builder for [`CircuitBreaker`]; defaults match a conservative production
/// profile (window of 100, 20-call minimum, 50% thresholds, 10s slow calls,
/// 10 half-open probes, 60s open wait).
pub struct CircuitBreakerBuilder<T, E> {
    name: String,
    window: Box<dyn Window>,
    metrics: Option<Arc<dyn BreakerMetrics>>,
    metrics_only: bool,
    minimum_calls: usize,
    failure_rate_threshold: f64,
    slow_call_rate_threshold: f64,
    slow_call_duration_threshold: Duration,
    permitted_half_open_calls: usize,
    open_state_wait: Duration,
    fail_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    fail_on_error: Option<Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>>,
    fail_errors: Vec<FaultMatcher<E>>,
    ignore_errors: Vec<FaultMatcher<E>>,
    clock: Arc<dyn Clock>,
}

impl<T, E> CircuitBreakerBuilder<T, E> {
    fn new(name: String) -> Self {
        Self {
            name,
            window: Box::new(CountWindow::new(100)),
            metrics: None,
            metrics_only: false,
            minimum_calls: 20,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(10),
            permitted_half_open_calls: 10,
            open_state_wait: Duration::from_secs(60),
            fail_on_result: None,
            fail_on_error: None,
            fail_errors: Vec::new(),
            ignore_errors: Vec::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn window(mut self, window: impl Window + 'static) -> Self {
        self.window = Box::new(window);
        self
    }

    pub fn metrics(mut self, metrics: impl BreakerMetrics + 'static) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// Observe and record every call without ever rejecting.
    pub fn metrics_only(mut self) -> Self {
        self.metrics_only = true;
        self
    }

    /// Calls required in the window before thresholds are evaluated.
    pub fn minimum_calls(mut self, count: usize) -> Self {
        self.minimum_calls = count;
        self
    }

    /// Failure percentage at or above which the breaker opens.
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Slow-call percentage at or above which the breaker opens.
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.slow_call_rate_threshold = percent;
        self
    }

    /// Duration at or above which a completed call counts as slow.
    pub fn slow_call_duration_threshold(mut self, duration: Duration) -> Self {
        self.slow_call_duration_threshold = duration;
        self
    }

    /// Probe leases issued when entering the half-open state.
    pub fn permitted_half_open_calls(mut self, count: usize) -> Self {
        self.permitted_half_open_calls = count;
        self
    }

    /// How long the breaker stays open before probing.
    pub fn open_state_wait(mut self, duration: Duration) -> Self {
        self.open_state_wait = duration;
        self
    }

    /// Treat selected success values as failures.
    pub fn fail_on_result(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.fail_on_result = Some(Arc::new(predicate));
        self
    }

    /// Authoritative failure predicate for errors; a `true` verdict fails the
    /// call before the fail/ignore lists are consulted.
    pub fn fail_on_error(
        mut self,
        predicate: impl Fn(&FaultError<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_on_error = Some(Arc::new(predicate));
        self
    }

    /// Error values that always count as failures. Appends on repeat calls.
    pub fn fail_on(mut self, errors: impl IntoIterator<Item = E>) -> Self
    where
        E: PartialEq + Send + Sync + 'static,
    {
        self.fail_errors.extend(errors.into_iter().map(match_value));
        self
    }

    /// Error values that never count as failures. Appends on repeat calls.
    pub fn ignore(mut self, errors: impl IntoIterator<Item = E>) -> Self
    where
        E: PartialEq + Send + Sync + 'static,
    {
        self.ignore_errors.extend(errors.into_iter().map(match_value));
        self
    }

    /// Sentinel kinds that always count as failures.
    pub fn fail_on_kinds(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.fail_errors.extend(kinds.into_iter().map(match_kind));
        self
    }

    /// Sentinel kinds that never count as failures.
    pub fn ignore_kinds(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.ignore_errors.extend(kinds.into_iter().map(match_kind));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> CircuitBreaker<T, E> {
        let initial = if self.metrics_only {
            State::MetricsOnly
        } else {
            State::Closed
        };
        let transitioned_at = self.clock.now_millis();

        CircuitBreaker {
            name: self.name,
            minimum_calls: self.minimum_calls,
            failure_rate_threshold: self.failure_rate_threshold,
            slow_call_rate_threshold: self.slow_call_rate_threshold,
            slow_call_duration_threshold: self.slow_call_duration_threshold,
            permitted_half_open_calls: self.permitted_half_open_calls,
            open_state_wait: self.open_state_wait,
            fail_on_result: self.fail_on_result,
            fail_on_error: self.fail_on_error,
            fail_errors: self.fail_errors,
            ignore_errors: self.ignore_errors,
            metrics: self.metrics,
            clock: self.clock,
            core: Mutex::new(Core {
                state: initial,
                transitioned_at,
                half_open_leases: 0,
                half_open_completed: 0,
                window: self.window,
            }),
        }
    }
}
