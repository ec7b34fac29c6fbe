//! Retry predicates.
//!
//! How often and how fast to retry is decided by an
//! [`attempt::Strategy`](crate::attempt::Strategy); whether a given failure is
//! worth retrying at all is decided by a [`RetryPredicate`].

use crate::Error;

/// Decides whether a failed request should be tried again.
///
/// # Examples
///
/// ```
/// use weo_client::{Error, RetryPredicate};
///
/// struct RetryOnRateLimit;
///
/// impl RetryPredicate for RetryOnRateLimit {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         error.status().is_some_and(|s| s.as_u16() == 429)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `attempt` is the number of the attempt that failed, starting at 1.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retries every error.
#[derive(Debug, Clone, Copy)]
pub struct RetryAlways;

impl RetryPredicate for RetryAlways {
    fn should_retry(&self, _error: &Error, _attempt: usize) -> bool {
        true
    }
}

/// Retries errors for which [`Error::is_retryable`] holds.
///
/// This is the client default: transport failures and structured errors
/// flagged `retry` are retried, everything else fails fast.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retries only connection-level failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        match error {
            Error::Network(e) => e.is_connect(),
            Error::Io(_) | Error::Handshake(_) => true,
            _ => false,
        }
    }
}

/// Retries if ANY of the predicates say so.
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only if ALL of the predicates say so.
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}
