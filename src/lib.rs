#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Steadfast
//!
//! Client-side fault handling for distributed systems: retry policies and
//! circuit breakers that compose.
//!
//! ## Features
//!
//! - **Retry policies** with per-attempt deadlines, fixed/linear/exponential
//!   backoff, result- and error-driven retryability, and a full attempt
//!   history on failure
//! - **Circuit breakers** driven by a count-based sliding window, with
//!   half-open probe leases, slow-call tracking, panic trapping, and a
//!   passive metrics-only mode
//! - **Cancellation-aware** end to end via `tokio_util::sync::CancellationToken`
//! - **Pluggable telemetry** through reporter traits, with no-op and
//!   in-memory implementations and process-wide defaults
//!
//! ## Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use steadfast::{Backoff, FaultError, Policy};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = Policy::<_, std::io::Error>::builder("fetch-profile")
//!         .max_attempts(3)
//!         .backoff(Backoff::exponential(Duration::from_millis(100)))
//!         .must_build();
//!
//!     let cancel = CancellationToken::new();
//!     let value = policy
//!         .execute(&cancel, |_scope| async {
//!             // issue the remote call here; wrap its errors in FaultError::Inner
//!             Ok::<_, FaultError<std::io::Error>>("profile")
//!         })
//!         .await
//!         .expect("all attempts failed");
//!
//!     assert_eq!(value, "profile");
//! }
//! ```
//!
//! To protect an unhealthy endpoint, build a [`CircuitBreaker`] and drive it
//! from the policy with [`Policy::execute_with_circuit`]; the
//! [`Policy::circuit_aware`] preset stops retrying once the breaker rejects.

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod prelude;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use circuit_breaker::window::{CallOutcome, CallRates, CountWindow, Window};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerBuilder, State};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{FaultError, FaultKind, PanicError};
pub use retry::error::{as_retry_error, RetryError, ValidationError};
pub use retry::metrics::{Attempt, Outcome, RetryMetrics};
pub use retry::{Policy, PolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
