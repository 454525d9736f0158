//! End-to-end retry sequences driven through the public API.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use steadfast::retry::metrics::{
    AttemptFailureReason, Outcome, OutcomeFailureReason, RetryMetrics,
};
use steadfast::{Attempt, Backoff, FaultError, InstantSleeper, Policy};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpstreamError(&'static str);

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream: {}", self.0)
    }
}

impl std::error::Error for UpstreamError {}

/// Captures every record a sequence emits, in arrival order.
#[derive(Debug, Default)]
struct Recorder {
    attempts: Mutex<Vec<Attempt>>,
    outcomes: Mutex<Vec<Outcome>>,
    backoffs: Mutex<Vec<u32>>,
}

impl Recorder {
    fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    fn backoffs(&self) -> Vec<u32> {
        self.backoffs.lock().unwrap().clone()
    }
}

impl RetryMetrics for Recorder {
    fn record_attempt(&self, attempt: &Attempt) {
        self.attempts.lock().unwrap().push(attempt.clone());
    }

    fn record_outcome(&self, outcome: &Outcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }

    fn record_backoff(&self, _policy: &str, upcoming_attempt: u32, _wait: Duration) {
        self.backoffs.lock().unwrap().push(upcoming_attempt);
    }
}

#[tokio::test]
async fn immediate_success_emits_one_attempt_and_one_outcome() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<&str, UpstreamError>::builder("immediate")
        .max_attempts(3)
        .backoff(Backoff::fixed(Duration::from_millis(10)))
        .metrics(recorder.clone())
        .sleeper(InstantSleeper)
        .must_build();

    let cancel = CancellationToken::new();
    let value = policy
        .execute(&cancel, |_| async { Ok("ok") })
        .await
        .expect("first attempt succeeds");

    assert_eq!(value, "ok");

    let attempts = recorder.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].is_success());
    assert_eq!(attempts[0].number, 1);

    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[0].total_attempts, 1);

    assert!(recorder.backoffs().is_empty());
}

#[tokio::test]
async fn exhaustion_emits_contiguous_attempts_and_backoffs_between_them() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<(), UpstreamError>::builder("exhausted")
        .max_attempts(3)
        .backoff(Backoff::fixed(Duration::ZERO))
        .metrics(recorder.clone())
        .sleeper(InstantSleeper)
        .must_build();

    let cancel = CancellationToken::new();
    let err = policy
        .execute(&cancel, |_| async { Err(FaultError::Inner(UpstreamError("x"))) })
        .await
        .unwrap_err();

    assert_eq!(err.attempts.len(), 3);
    let numbers: Vec<u32> = err.attempts.iter().map(|a| a.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let outcomes = recorder.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].failure_reason, Some(OutcomeFailureReason::Exhausted));
    assert_eq!(outcomes[0].total_attempts, 3);

    assert_eq!(recorder.backoffs(), vec![2, 3], "a backoff precedes attempts 2 and 3 only");
    assert_eq!(recorder.attempts().len(), err.attempts.len());
}

#[tokio::test]
async fn non_retryable_errors_short_circuit() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<(), UpstreamError>::builder("fatal")
        .max_attempts(5)
        .ignore([UpstreamError("schema-mismatch")])
        .metrics(recorder.clone())
        .sleeper(InstantSleeper)
        .must_build();

    let invocations = AtomicUsize::new(0);
    let cancel = CancellationToken::new();
    let err = policy
        .execute(&cancel, |_| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Err(FaultError::Inner(UpstreamError("schema-mismatch"))) }
        })
        .await
        .unwrap_err();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts.len(), 1);
    assert_eq!(
        recorder.outcomes()[0].failure_reason,
        Some(OutcomeFailureReason::NonRetryable)
    );
}

#[tokio::test]
async fn result_predicate_retry_then_success() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<&str, UpstreamError>::builder("content-check")
        .max_attempts(3)
        .retry_on_result(|value| *value == "bad")
        .metrics(recorder.clone())
        .sleeper(InstantSleeper)
        .must_build();

    let calls = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let counter = calls.clone();
    let value = policy
        .execute(&cancel, move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok("bad")
                } else {
                    Ok("good")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "good");

    let attempts = recorder.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].failure_reason, Some(AttemptFailureReason::Result));
    assert!(attempts[0].retryable);
    let sentinel = attempts[0]
        .error
        .as_ref()
        .expect("the rejected attempt carries the sentinel")
        .downcast_ref::<FaultError<UpstreamError>>()
        .unwrap();
    assert!(matches!(sentinel, FaultError::ResultRetry));
    assert!(attempts[1].is_success());
}

#[tokio::test]
async fn attempt_timeouts_classify_and_bound_duration() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<(), UpstreamError>::builder("deadline")
        .max_attempts(2)
        .attempt_timeout(Duration::from_millis(50))
        .backoff(Backoff::fixed(Duration::ZERO))
        .metrics(recorder.clone())
        .sleeper(InstantSleeper)
        .must_build();

    let cancel = CancellationToken::new();
    let err = policy
        .execute(&cancel, |scope| async move {
            // Honors its scope the cooperative way; the deadline fires first.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => Ok(()),
                _ = scope.cancelled() => Err(FaultError::Canceled),
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.attempts.len(), 2);
    for attempt in &err.attempts {
        assert_eq!(attempt.failure_reason, Some(AttemptFailureReason::Timeout));
        assert!(attempt.duration >= Duration::from_millis(30));
        assert!(attempt.duration < Duration::from_millis(250));
    }
    assert_eq!(
        recorder.outcomes()[0].failure_reason,
        Some(OutcomeFailureReason::Exhausted)
    );
}

#[tokio::test]
async fn caller_cancellation_mid_backoff_sets_the_termination_error() {
    let recorder = Arc::new(Recorder::default());
    let policy = Policy::<(), UpstreamError>::builder("interrupted")
        .max_attempts(4)
        .backoff(Backoff::fixed(Duration::from_secs(60)))
        .metrics(recorder.clone())
        .must_build();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = policy
        .execute(&cancel, |_| async { Err(FaultError::Inner(UpstreamError("down"))) })
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(err.attempts.len(), 1);
    assert!(err.termination_error.is_some());
    assert_eq!(
        recorder.outcomes()[0].failure_reason,
        Some(OutcomeFailureReason::Canceled)
    );
    assert!(recorder.backoffs().is_empty(), "the interrupted wait is not a backoff record");
}

#[tokio::test]
async fn retry_error_supports_chain_matching_and_verbose_reports() {
    let policy = Policy::<(), UpstreamError>::builder("report")
        .max_attempts(2)
        .backoff(Backoff::fixed(Duration::ZERO))
        .sleeper(InstantSleeper)
        .must_build();

    let cancel = CancellationToken::new();
    let err = policy
        .execute(&cancel, |_| async { Err(FaultError::Inner(UpstreamError("down"))) })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "retry failed after 2 attempt(s): upstream: down");

    let report = err.verbose();
    assert!(report.contains("attempt 1 ["));
    assert!(report.contains("attempt 2 ["));
    assert!(report.contains("upstream: down"));

    let found = steadfast::as_retry_error(&err).expect("the error matches itself");
    assert_eq!(found.attempts.len(), 2);

    let last = err.last().unwrap();
    let fault = last.downcast_ref::<FaultError<UpstreamError>>().unwrap();
    assert_eq!(fault.as_inner(), Some(&UpstreamError("down")));
}

#[tokio::test]
async fn concurrent_sequences_share_one_policy() {
    let policy = Arc::new(
        Policy::<u32, UpstreamError>::builder("shared")
            .max_attempts(3)
            .backoff(Backoff::fixed(Duration::from_millis(1)))
            .must_build(),
    );

    let mut handles = Vec::new();
    for task in 0..8u32 {
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            let calls = Arc::new(AtomicUsize::new(0));
            let cancel = CancellationToken::new();
            let counter = calls.clone();
            policy
                .execute(&cancel, move |_| {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(FaultError::Inner(UpstreamError("first try")))
                        } else {
                            Ok(task)
                        }
                    }
                })
                .await
        }));
    }

    for (task, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap().expect("every sequence recovers");
        assert_eq!(value, task as u32);
    }
}
