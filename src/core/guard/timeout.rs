/*!
 * Lock Timeouts
 *
 * Caller-facing timeout values and the deadline arithmetic shared by the
 * blocking and async acquisition paths.
 *
 * ## Conventions
 *
 * - `LockTimeout::Infinite` waits until acquired or cancelled
 * - `LockTimeout::After(Duration::ZERO)` polls the gate exactly once
 * - Signed milliseconds: `-1` is infinite, any other negative is rejected
 *
 * ## Example
 *
 * ```ignore
 * let timeout = LockTimeout::from_millis(250)?;
 * let deadline = Deadline::start(timeout);
 *
 * // Spend at most the sync budget blocking, the rest suspended
 * let blocking = deadline.capped(config.sync_wait_budget);
 * ```
 */

use crate::core::errors::{LockError, LockResult};
use std::time::{Duration, Instant};

/// Timeout for a single acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockTimeout {
    /// Wait until acquired or cancelled
    #[default]
    Infinite,
    /// Give up once the duration has elapsed
    After(Duration),
}

impl LockTimeout {
    /// Sentinel for "wait forever" in signed millisecond form
    pub const INFINITE_MILLIS: i64 = -1;

    /// Single non-blocking poll
    pub const fn poll() -> Self {
        Self::After(Duration::ZERO)
    }

    /// Build from signed milliseconds
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for negative values other than `-1`
    pub fn from_millis(millis: i64) -> LockResult<Self> {
        match millis {
            Self::INFINITE_MILLIS => Ok(Self::Infinite),
            m if m < 0 => Err(LockError::invalid(format!(
                "timeout must be non-negative or -1 (infinite), got {}ms",
                m
            ))),
            m => Ok(Self::After(Duration::from_millis(m as u64))),
        }
    }

    /// Get the finite duration, if any
    #[inline]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(*d),
        }
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }
}

impl From<Duration> for LockTimeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

impl From<Option<Duration>> for LockTimeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::Infinite, Self::After)
    }
}

/// Absolute point in time an acquisition must finish by
///
/// One deadline is computed per attempt so that the sync budget and the
/// async remainder always add up to the caller's timeout.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: LockTimeout,
}

impl Deadline {
    /// Start measuring from now
    #[inline]
    pub fn start(timeout: LockTimeout) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Deadline that never expires
    #[inline]
    pub fn never() -> Self {
        Self::start(LockTimeout::Infinite)
    }

    /// Time left, `None` when infinite
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .duration()
            .map(|d| d.saturating_sub(self.start.elapsed()))
    }

    /// Time left, clamped to `cap`
    pub fn capped(&self, cap: Duration) -> Duration {
        match self.remaining() {
            None => cap,
            Some(left) => left.min(cap),
        }
    }

    /// Absolute instant, `None` when infinite (or beyond what `Instant` can represent)
    pub fn instant(&self) -> Option<Instant> {
        self.timeout
            .duration()
            .and_then(|d| self.start.checked_add(d))
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[inline]
    pub fn timeout(&self) -> LockTimeout {
        self.timeout
    }

    /// Timeout error for this deadline
    pub fn timeout_error(&self) -> LockError {
        LockError::timeout(self.elapsed(), self.timeout.duration().unwrap_or_default())
    }
}
