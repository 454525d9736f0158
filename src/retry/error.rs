//! Aggregated retry failures and policy validation errors.

use super::metrics::Attempt;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Complete history of a failed retry sequence.
///
/// Carries every failed [`Attempt`] in order, plus the termination error when
/// the sequence was cut short by cancellation during a backoff wait. The
/// source chain leads to the termination error if present, else to the last
/// attempt's error, so `downcast`-based matching reaches the underlying
/// causes.
#[derive(Debug, Clone, Default)]
pub struct RetryError {
    pub attempts: Vec<Attempt>,
    pub termination_error: Option<Arc<dyn StdError + Send + Sync>>,
}

fn erase<'a>(err: &'a (dyn StdError + Send + Sync + 'static)) -> &'a (dyn StdError + 'static) {
    err
}

impl RetryError {
    pub(crate) fn with_capacity(attempts: usize) -> Self {
        Self { attempts: Vec::with_capacity(attempts), termination_error: None }
    }

    /// The error that ended the sequence.
    pub fn last(&self) -> Option<&(dyn StdError + 'static)> {
        if let Some(termination) = &self.termination_error {
            return Some(erase(termination.as_ref()));
        }
        self.attempts
            .last()
            .and_then(|attempt| attempt.error.as_deref())
            .map(erase)
    }

    /// Every attempt error, oldest first.
    pub fn all_errors(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        self.attempts
            .iter()
            .filter_map(|attempt| attempt.error.as_deref())
            .map(erase)
    }

    /// Multi-line report listing every attempt with its timestamp, duration,
    /// and error.
    pub fn verbose(&self) -> String {
        let mut report = format!("retry failed after {} attempt(s):\n", self.attempts.len());
        for attempt in &self.attempts {
            let error = attempt
                .error
                .as_deref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_owned());
            let _ = writeln!(
                report,
                "  attempt {} [{}] (took {:?}): {}",
                attempt.number,
                attempt.started_at.to_rfc3339(),
                attempt.duration,
                error,
            );
        }
        report
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "retry failed: no attempts recorded");
        }
        match self.attempts.last().and_then(|attempt| attempt.error.as_deref()) {
            Some(err) => {
                write!(f, "retry failed after {} attempt(s): {}", self.attempts.len(), err)
            }
            None => write!(f, "retry failed after {} attempt(s)", self.attempts.len()),
        }
    }
}

impl StdError for RetryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last()
    }
}

/// Walk `err`'s source chain (starting at `err` itself) to the first
/// [`RetryError`].
pub fn as_retry_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a RetryError> {
    let mut current = Some(err);
    while let Some(candidate) = current {
        if let Some(retry_err) = candidate.downcast_ref::<RetryError>() {
            return Some(retry_err);
        }
        current = candidate.source();
    }
    None
}

/// Rejected policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy error: field '{}' - {}", self.field, self.message)
    }
}

impl StdError for ValidationError {}
