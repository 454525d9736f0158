//! Backoff strategies for retry policies.
//!
//! A strategy maps the number of the attempt that just completed to the wait
//! before the next one, so the first inter-attempt wait is computed with
//! `attempt = 1` (linear backoff starts at one interval, not zero).
//!
//! ```rust
//! use std::time::Duration;
//! use steadfast::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.next(1), Duration::from_millis(100));
//! assert_eq!(backoff.next(2), Duration::from_millis(200));
//! assert_eq!(backoff.next(8), Duration::from_secs(2)); // capped
//! ```

use rand::Rng;
use std::fmt;
use std::time::Duration;

const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// `with_max`, `with_multiplier`, and `with_jitter` only apply to the
    /// exponential strategy.
    NotExponential,
    MaxBelowInitial { initial: Duration, max: Duration },
    MultiplierBelowOne(f64),
    JitterOutOfRange(f64),
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::NotExponential => {
                write!(f, "option is only valid for exponential backoff")
            }
            BackoffError::MaxBelowInitial { initial, max } => {
                write!(f, "max ({:?}) must be >= initial ({:?})", max, initial)
            }
            BackoffError::MultiplierBelowOne(m) => {
                write!(f, "multiplier must be >= 1.0 (got {})", m)
            }
            BackoffError::JitterOutOfRange(j) => {
                write!(f, "jitter must be within [0.0, 1.0] (got {})", j)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Wait-duration strategy between retry attempts.
///
/// Strategies are stateless values; share them freely across policies.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same wait after every attempt.
    Fixed { interval: Duration },
    /// `attempt × interval`, growing without a cap.
    Linear { interval: Duration },
    /// `initial × multiplier^(attempt - 1)`, optionally jittered by a
    /// uniform delta in `±(base × jitter)`, clamped to `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
    },
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Backoff::Fixed { interval }
    }

    pub fn linear(interval: Duration) -> Self {
        Backoff::Linear { interval }
    }

    /// Exponential strategy with a 10s cap, doubling, and no jitter.
    pub fn exponential(initial: Duration) -> Self {
        Backoff::Exponential {
            initial,
            max: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: 0.0,
        }
    }

    /// Cap the exponential wait. Errors on other strategies or `max < initial`.
    pub fn with_max(mut self, new_max: Duration) -> Result<Self, BackoffError> {
        match &mut self {
            Backoff::Exponential { initial, max, .. } => {
                if new_max < *initial {
                    return Err(BackoffError::MaxBelowInitial { initial: *initial, max: new_max });
                }
                *max = new_max;
                Ok(self)
            }
            _ => Err(BackoffError::NotExponential),
        }
    }

    /// Change the exponential growth factor. Errors on other strategies or
    /// factors below 1.0.
    pub fn with_multiplier(mut self, factor: f64) -> Result<Self, BackoffError> {
        match &mut self {
            Backoff::Exponential { multiplier, .. } => {
                if factor < 1.0 {
                    return Err(BackoffError::MultiplierBelowOne(factor));
                }
                *multiplier = factor;
                Ok(self)
            }
            _ => Err(BackoffError::NotExponential),
        }
    }

    /// Randomize each exponential wait by `±(base × jitter)`. The factor must
    /// be within `[0.0, 1.0]`.
    pub fn with_jitter(mut self, factor: f64) -> Result<Self, BackoffError> {
        match &mut self {
            Backoff::Exponential { jitter, .. } => {
                if !(0.0..=1.0).contains(&factor) {
                    return Err(BackoffError::JitterOutOfRange(factor));
                }
                *jitter = factor;
                Ok(self)
            }
            _ => Err(BackoffError::NotExponential),
        }
    }

    /// Wait before the attempt following `attempt` (1-based, the attempt that
    /// just completed).
    pub fn next(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { interval } => *interval,
            Backoff::Linear { interval } => interval.saturating_mul(attempt),
            Backoff::Exponential { initial, max, multiplier, jitter } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let base = initial.as_secs_f64() * multiplier.powi(exponent);

                let mut wait = base;
                if *jitter > 0.0 {
                    let delta = base * jitter * (2.0 * rand::rng().random::<f64>() - 1.0);
                    wait = (base + delta).max(0.0);
                }

                Duration::from_secs_f64(wait.min(max.as_secs_f64()))
            }
        }
    }
}
