/*!
 * RAII Lock Guards
 *
 * Shared guard abstractions and timeout types for both lock engines.
 *
 * ## Design Principles
 *
 * 1. **Single release**: `release(self)` consumes the guard; `Drop` releases
 *    when it was never called, so a gate is released exactly once
 * 2. **Owned**: guards hold `Arc`s to engine state, so they are `'static` and
 *    can move across threads and tasks
 * 3. **Observable**: guards carry creation metadata for hold-time tracing
 *
 * ## Example
 *
 * ```ignore
 * let guard = locks.acquire("order-42".to_string(), None)?;
 * // critical section
 * guard.release(); // or let it drop
 * ```
 */

mod timeout;
mod traits;

pub use timeout::{Deadline, LockTimeout};
pub use traits::Guard;

use std::time::{Duration, Instant};

/// Guard metadata for observability
#[derive(Debug, Clone)]
pub struct GuardMetadata {
    pub resource_type: &'static str,
    pub creation_time: Instant,
}

impl GuardMetadata {
    #[inline]
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            creation_time: Instant::now(),
        }
    }

    /// Time since the guard was issued
    #[inline]
    pub fn held_for(&self) -> Duration {
        self.creation_time.elapsed()
    }

    #[inline]
    pub fn lifetime_micros(&self) -> u64 {
        self.held_for().as_micros() as u64
    }
}
