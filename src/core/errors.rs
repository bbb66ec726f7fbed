/*!
 * Error Types
 * Centralized lock error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Errors surfaced by lock acquisition
///
/// Internal protocol violations are not represented here: they panic, since
/// they mean the one-gate-per-key invariant may already be broken.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LockError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(lock::invalid_argument),
        help("Timeouts must be non-negative (or -1 for infinite) and slot counts positive.")
    )]
    InvalidArgument(String),

    #[error("Lock acquisition was cancelled")]
    #[diagnostic(
        code(lock::cancelled),
        help("The cancellation token passed to the acquire call was triggered while waiting.")
    )]
    Cancelled,

    #[error("Lock acquisition timed out after {elapsed_ms}ms (timeout: {timeout_ms}ms)")]
    #[diagnostic(
        code(lock::timeout),
        help("The key is held by another caller. Increase the timeout or use try_acquire.")
    )]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },
}

impl LockError {
    /// Create an invalid argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a timeout error from measured durations
    pub fn timeout(elapsed: Duration, timeout: Duration) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Check if this error is a cancellation
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is a timeout
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
