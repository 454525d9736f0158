//! Retry policies driving a fallible async operation through bounded attempts.
//!
//! A [`Policy`] owns the declarative side — attempt budget, per-attempt
//! deadline, backoff strategy, retryability rules, reporter — and
//! [`Policy::execute`] drives an operation through it. Each attempt runs
//! under a child cancellation scope derived from the caller's token; between
//! attempts the engine sleeps through the policy's [`Sleeper`], aborting the
//! whole sequence if the caller cancels mid-wait. Failed sequences return a
//! [`RetryError`](error::RetryError) carrying the full attempt history.
//!
//! Operations return `Result<T, FaultError<E>>`, wrapping their own failures
//! in [`FaultError::Inner`]; the dedicated variants are produced by the
//! engine and the circuit breaker. [`Policy::run`] adapts operations that
//! return plain `Result<T, E>`.

pub mod error;
pub mod metrics;

use crate::backoff::Backoff;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{match_kind, match_value, FaultError, FaultKind, FaultMatcher};
use crate::sleeper::{Sleeper, TokioSleeper};
use chrono::Utc;
use error::{RetryError, ValidationError};
use metrics::{
    Attempt, AttemptFailureReason, AttemptStatus, Outcome, OutcomeFailureReason, OutcomeStatus,
    RetryMetrics,
};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable retry configuration, shared across concurrent callers.
///
/// Generic over the operation's success value `T` (consulted by the result
/// predicate) and its error `E`.
pub struct Policy<T, E> {
    name: String,
    metrics: Option<Arc<dyn RetryMetrics>>,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    backoff: Backoff,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    retry_on_error: Option<Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>>,
    retry_errors: Vec<FaultMatcher<E>>,
    ignore_errors: Vec<FaultMatcher<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> Clone for Policy<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            metrics: self.metrics.clone(),
            max_attempts: self.max_attempts,
            attempt_timeout: self.attempt_timeout,
            backoff: self.backoff.clone(),
            retry_on_result: self.retry_on_result.clone(),
            retry_on_error: self.retry_on_error.clone(),
            retry_errors: self.retry_errors.clone(),
            ignore_errors: self.ignore_errors.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Policy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<T, E> Policy<T, E> {
    pub fn builder(name: impl Into<String>) -> PolicyBuilder<T, E> {
        PolicyBuilder::new(name.into())
    }

    /// Builder preset for operations wrapped in a circuit breaker: the two
    /// breaker rejection sentinels are pre-seeded into the ignore list, so a
    /// rejection ends the sequence instead of hammering an open breaker.
    pub fn circuit_aware(name: impl Into<String>) -> PolicyBuilder<T, E> {
        Self::builder(name).ignore_kinds([FaultKind::CircuitOpen, FaultKind::CircuitHalfOpen])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Copy of this policy under a new telemetry name.
    pub fn clone_named(&self, name: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.name = name.into();
        clone
    }

    fn reporter(&self) -> Arc<dyn RetryMetrics> {
        self.metrics.clone().unwrap_or_else(metrics::global)
    }
}

impl<T, E> Policy<T, E>
where
    T: Send,
    E: StdError + Send + Sync + 'static,
{
    /// Retryability of one attempt error.
    ///
    /// The error predicate, when configured, is authoritative. Otherwise the
    /// ignore list denies, then a non-empty retry list must match; with no
    /// lists configured every error is retryable.
    pub fn should_retry_error(&self, err: &FaultError<E>) -> bool {
        if let Some(predicate) = &self.retry_on_error {
            return predicate(err);
        }
        if self.ignore_errors.iter().any(|matcher| matcher(err)) {
            return false;
        }
        if !self.retry_errors.is_empty() {
            return self.retry_errors.iter().any(|matcher| matcher(err));
        }
        true
    }

    /// Drive `op` through this policy until it succeeds, exhausts the attempt
    /// budget, fails non-retryably, or the caller cancels.
    ///
    /// Each invocation receives a child token of `cancel`, cancelled when the
    /// attempt ends; with an attempt timeout configured the invocation also
    /// races its deadline. Exactly one outcome is reported per call.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, FaultError<E>>> + Send,
    {
        let reporter = self.reporter();
        let sequence_start = Instant::now();
        let mut outcome = Outcome {
            policy: self.name.clone(),
            total_attempts: 0,
            total_duration: Duration::ZERO,
            status: OutcomeStatus::Error,
            failure_reason: None,
        };
        let mut attempt_count: u32 = 1;

        let result = self
            .drive(cancel, &mut op, reporter.as_ref(), &mut outcome, &mut attempt_count)
            .await;

        outcome.total_attempts = attempt_count;
        outcome.total_duration = sequence_start.elapsed();
        reporter.record_outcome(&outcome);

        result
    }

    async fn drive<F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: &mut F,
        reporter: &dyn RetryMetrics,
        outcome: &mut Outcome,
        attempt_count: &mut u32,
    ) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, FaultError<E>>> + Send,
    {
        let mut history = RetryError::with_capacity(self.max_attempts as usize);

        loop {
            let (attempt, value) = self.attempt_once(cancel, op, *attempt_count).await;
            reporter.record_attempt(&attempt);

            if let Some(value) = value {
                outcome.status = OutcomeStatus::Success;
                return Ok(value);
            }

            let retryable = attempt.retryable;
            history.attempts.push(attempt);

            if !retryable {
                outcome.failure_reason = Some(OutcomeFailureReason::NonRetryable);
                break;
            }
            if *attempt_count >= self.max_attempts {
                outcome.failure_reason = Some(OutcomeFailureReason::Exhausted);
                break;
            }

            let wait = self.backoff.next(*attempt_count);
            let interrupted = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = self.sleeper.sleep(wait) => false,
            };
            if interrupted {
                outcome.failure_reason = Some(OutcomeFailureReason::Canceled);
                let termination: Arc<dyn StdError + Send + Sync> =
                    Arc::new(FaultError::<E>::Canceled);
                history.termination_error = Some(termination);
                return Err(history);
            }

            *attempt_count += 1;
            reporter.record_backoff(&self.name, *attempt_count, wait);
        }

        tracing::debug!(
            policy = %self.name,
            attempts = history.attempts.len(),
            reason = ?outcome.failure_reason,
            "retry sequence failed"
        );
        Err(history)
    }

    /// One pass through the attempt lifecycle: scope, invoke, classify.
    async fn attempt_once<F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: &mut F,
        number: u32,
    ) -> (Attempt, Option<T>)
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, FaultError<E>>> + Send,
    {
        let started_at = Utc::now();
        let attempt_start = Instant::now();
        let mut attempt = Attempt {
            policy: self.name.clone(),
            number,
            started_at,
            duration: Duration::ZERO,
            status: AttemptStatus::Error,
            failure_reason: None,
            error: None,
            retryable: false,
        };

        let call = if cancel.is_cancelled() {
            Err(FaultError::Canceled)
        } else {
            let scope = cancel.child_token();
            let call = match self.attempt_timeout {
                Some(limit) => {
                    tokio::select! {
                        result = op(scope.clone()) => result,
                        _ = tokio::time::sleep(limit) => Err(FaultError::Timeout {
                            elapsed: attempt_start.elapsed(),
                            limit,
                        }),
                        _ = cancel.cancelled() => Err(FaultError::Canceled),
                    }
                }
                None => {
                    tokio::select! {
                        result = op(scope.clone()) => result,
                        _ = cancel.cancelled() => Err(FaultError::Canceled),
                    }
                }
            };
            scope.cancel();
            call
        };
        attempt.duration = attempt_start.elapsed();

        match call {
            Ok(value) => {
                let retry_result = self
                    .retry_on_result
                    .as_ref()
                    .is_some_and(|predicate| predicate(&value));
                if !retry_result {
                    attempt.status = AttemptStatus::Success;
                    return (attempt, Some(value));
                }

                attempt.failure_reason = Some(AttemptFailureReason::Result);
                attempt.retryable = true;
                let sentinel: Arc<dyn StdError + Send + Sync> =
                    Arc::new(FaultError::<E>::ResultRetry);
                attempt.error = Some(sentinel);
                (attempt, None)
            }
            Err(err) => {
                attempt.failure_reason = Some(match err.kind() {
                    FaultKind::Timeout => AttemptFailureReason::Timeout,
                    FaultKind::Canceled => AttemptFailureReason::Canceled,
                    _ => AttemptFailureReason::Error,
                });
                attempt.retryable = self.should_retry_error(&err);
                let erased: Arc<dyn StdError + Send + Sync> = Arc::new(err);
                attempt.error = Some(erased);
                (attempt, None)
            }
        }
    }

    /// [`execute`](Policy::execute) for operations returning the plain error
    /// type.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.execute(cancel, move |scope| {
            let call = op(scope);
            async move { call.await.map_err(FaultError::Inner) }
        })
        .await
    }

    /// Retry `op` with every attempt admitted through `breaker`.
    ///
    /// Combine with [`Policy::circuit_aware`] so breaker rejections end the
    /// sequence as non-retryable.
    pub async fn execute_with_circuit<F, Fut>(
        &self,
        cancel: &CancellationToken,
        breaker: &CircuitBreaker<T, E>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, FaultError<E>>> + Send,
    {
        self.execute(cancel, move |scope| {
            let call = op(scope.clone());
            async move { breaker.execute(&scope, move |_| call).await }
        })
        .await
    }

    /// [`execute_with_circuit`](Policy::execute_with_circuit) for operations
    /// returning the plain error type.
    pub async fn run_with_circuit<F, Fut>(
        &self,
        cancel: &CancellationToken,
        breaker: &CircuitBreaker<T, E>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        self.execute_with_circuit(cancel, breaker, move |scope| {
            let call = op(scope);
            async move { call.await.map_err(FaultError::Inner) }
        })
        .await
    }
}

/// Builder for [`Policy`]. `build` validates the configuration; `must_build`
/// panics on invalid configuration.
pub struct PolicyBuilder<T, E> {
    name: String,
    metrics: Option<Arc<dyn RetryMetrics>>,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    backoff: Backoff,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    retry_on_error: Option<Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>>,
    retry_errors: Vec<FaultMatcher<E>>,
    ignore_errors: Vec<FaultMatcher<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> PolicyBuilder<T, E> {
    fn new(name: String) -> Self {
        Self {
            name,
            metrics: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: None,
            backoff: Backoff::linear(DEFAULT_BACKOFF_INTERVAL),
            retry_on_result: None,
            retry_on_error: None,
            retry_errors: Vec::new(),
            ignore_errors: Vec::new(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Attempt budget, counting the initial call as attempt 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Deadline for each individual attempt.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Treat selected success values as retryable failures.
    pub fn retry_on_result(
        mut self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    /// Authoritative retryability predicate; overrides the retry/ignore
    /// lists entirely.
    pub fn retry_on_error(
        mut self,
        predicate: impl Fn(&FaultError<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on_error = Some(Arc::new(predicate));
        self
    }

    /// Allowlist of retryable error values. Appends on repeat calls; once
    /// non-empty, unlisted errors stop the sequence.
    pub fn retry_on(mut self, errors: impl IntoIterator<Item = E>) -> Self
    where
        E: PartialEq + Send + Sync + 'static,
    {
        self.retry_errors.extend(errors.into_iter().map(match_value));
        self
    }

    /// Denylist of error values that end the sequence immediately. Appends on
    /// repeat calls.
    pub fn ignore(mut self, errors: impl IntoIterator<Item = E>) -> Self
    where
        E: PartialEq + Send + Sync + 'static,
    {
        self.ignore_errors.extend(errors.into_iter().map(match_value));
        self
    }

    /// Allowlist of retryable sentinel kinds.
    pub fn retry_on_kinds(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.retry_errors.extend(kinds.into_iter().map(match_kind));
        self
    }

    /// Denylist of sentinel kinds that end the sequence immediately.
    pub fn ignore_kinds(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.ignore_errors.extend(kinds.into_iter().map(match_kind));
        self
    }

    /// Per-policy reporter; without one the process-wide reporter is used.
    pub fn metrics(mut self, metrics: impl RetryMetrics + 'static) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// Replace the backoff wait primitive (test hook).
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<Policy<T, E>, ValidationError> {
        if self.max_attempts < 1 {
            return Err(ValidationError {
                field: "max_attempts",
                message: "must be at least 1".to_owned(),
            });
        }

        Ok(Policy {
            name: self.name,
            metrics: self.metrics,
            max_attempts: self.max_attempts,
            attempt_timeout: self.attempt_timeout,
            backoff: self.backoff,
            retry_on_result: self.retry_on_result,
            retry_on_error: self.retry_on_error,
            retry_errors: self.retry_errors,
            ignore_errors: self.ignore_errors,
            sleeper: self.sleeper,
        })
    }

    /// `build`, aborting on invalid configuration.
    pub fn must_build(self) -> Policy<T, E> {
        match self.build() {
            Ok(policy) => policy,
            Err(err) => panic!("{}", err),
        }
    }
}
