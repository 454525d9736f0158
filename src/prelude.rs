//! Convenient re-exports for common Steadfast types.
pub use crate::{
    backoff::{Backoff, BackoffError},
    circuit_breaker::{
        metrics::{BreakerMetrics, InMemoryBreakerMetrics, NoopBreakerMetrics},
        window::{CallOutcome, CallRates, CountWindow, Window},
        CircuitBreaker, CircuitBreakerBuilder, State,
    },
    clock::{Clock, ManualClock, MonotonicClock},
    error::{FaultError, FaultKind, PanicError},
    retry::{
        error::{as_retry_error, RetryError, ValidationError},
        metrics::{Attempt, InMemoryRetryMetrics, NoopRetryMetrics, Outcome, RetryMetrics},
        Policy, PolicyBuilder,
    },
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
};
