//! Unified call-error type shared by the retry engine and the circuit breaker.
//!
//! Operations driven by either primitive return `Result<T, FaultError<E>>`:
//! their own failures travel as [`FaultError::Inner`], while the toolkit's
//! sentinels (attempt deadline, caller cancellation, breaker rejections,
//! trapped panics, result-predicate retries) are dedicated variants. Policy
//! and breaker configuration match sentinels by [`FaultKind`] and user error
//! values by equality.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error surfaced by a single wrapped call.
#[derive(Debug)]
pub enum FaultError<E> {
    /// The operation's own error.
    Inner(E),
    /// The per-attempt deadline elapsed before the operation finished.
    Timeout { elapsed: Duration, limit: Duration },
    /// The caller's cancellation scope fired.
    Canceled,
    /// The success value was rejected by the policy's result predicate.
    ResultRetry,
    /// The circuit breaker is open.
    CircuitOpen,
    /// The circuit breaker is half-open with no probe leases left.
    CircuitHalfOpen,
    /// The operation panicked inside the breaker executor.
    Panic(PanicError),
}

/// Field-free discriminant of [`FaultError`], used for sentinel matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Inner,
    Timeout,
    Canceled,
    ResultRetry,
    CircuitOpen,
    CircuitHalfOpen,
    Panic,
}

impl<E> FaultError<E> {
    pub fn kind(&self) -> FaultKind {
        match self {
            FaultError::Inner(_) => FaultKind::Inner,
            FaultError::Timeout { .. } => FaultKind::Timeout,
            FaultError::Canceled => FaultKind::Canceled,
            FaultError::ResultRetry => FaultKind::ResultRetry,
            FaultError::CircuitOpen => FaultKind::CircuitOpen,
            FaultError::CircuitHalfOpen => FaultKind::CircuitHalfOpen,
            FaultError::Panic(_) => FaultKind::Panic,
        }
    }

    /// True for the two breaker admission sentinels.
    pub fn is_rejection(&self) -> bool {
        matches!(self, FaultError::CircuitOpen | FaultError::CircuitHalfOpen)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FaultError::Timeout { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, FaultError::Canceled)
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, FaultError::Inner(_))
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            FaultError::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            FaultError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for FaultError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::Inner(e) => write!(f, "{}", e),
            FaultError::Timeout { elapsed, limit } => {
                write!(f, "attempt timed out after {:?} (limit {:?})", elapsed, limit)
            }
            FaultError::Canceled => write!(f, "call canceled"),
            FaultError::ResultRetry => write!(f, "result predicate triggered retry"),
            FaultError::CircuitOpen => write!(f, "circuit breaker: open state"),
            FaultError::CircuitHalfOpen => {
                write!(f, "circuit breaker: half-open state with no available calls")
            }
            FaultError::Panic(p) => write!(f, "{}", p),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FaultError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FaultError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// A panic trapped by the breaker executor, carrying the rendered payload and
/// the backtrace captured at the trap site.
///
/// A panicking operation never produced an error, so there is no cause to
/// unwrap into; `source()` is `None`.
#[derive(Debug, Clone)]
pub struct PanicError {
    payload: String,
    backtrace: Arc<str>,
}

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let rendered = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };

        Self {
            payload: rendered,
            backtrace: Backtrace::force_capture().to_string().into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call panicked: {}", self.payload)
    }
}

impl std::error::Error for PanicError {}

/// Configured matcher over call errors; the compiled form of one allow/deny
/// list entry.
pub(crate) type FaultMatcher<E> = Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>;

/// Matcher selecting `Inner` errors equal to `err`.
pub(crate) fn match_value<E>(err: E) -> FaultMatcher<E>
where
    E: PartialEq + Send + Sync + 'static,
{
    Arc::new(move |fault| matches!(fault, FaultError::Inner(inner) if *inner == err))
}

/// Matcher selecting every error of the given kind.
pub(crate) fn match_kind<E>(kind: FaultKind) -> FaultMatcher<E> {
    Arc::new(move |fault| fault.kind() == kind)
}
