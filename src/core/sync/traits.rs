/*!
 * Gate Traits
 *
 * The exclusive gate is the building block both lock engines wait on.
 *
 * # Design: Trait Seam for Implementations
 *
 * Engines are generic over `Gate` so tests can substitute instrumented
 * gates. `BinaryGate` is the default implementation.
 */

use super::cancel::CancellationToken;
use crate::core::guard::Deadline;
use std::future::Future;

/// Result of a single wait on a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The caller now holds the gate
    Acquired,
    /// The deadline passed first
    TimedOut,
    /// The cancellation token fired first
    Cancelled,
}

impl WaitOutcome {
    #[inline(always)]
    pub fn is_acquired(&self) -> bool {
        matches!(self, WaitOutcome::Acquired)
    }
}

/// Binary, non-reentrant exclusive gate
///
/// Implementations must be:
/// - **Thread-safe**: `enter_*` and `leave` may run on any thread or task
/// - **Affinity-free**: `leave` may come from a different caller than the one that entered
/// - **Cancel-aware**: a fired token ends a wait promptly
///
/// Fairness is not required.
pub trait Gate: Send + Sync + 'static {
    /// Take the gate if it is free, without waiting
    fn try_enter(&self) -> bool;

    /// Block the current thread until entered, timed out, or cancelled
    ///
    /// An already-fired token yields `Cancelled` even when the gate is free.
    fn enter_blocking(&self, deadline: Deadline, cancel: Option<&CancellationToken>)
        -> WaitOutcome;

    /// Suspend the current task until entered, timed out, or cancelled
    ///
    /// Dropping the future before completion must not leave the gate held
    /// and must not swallow a wakeup meant for another waiter.
    fn enter_async<'a>(
        &'a self,
        deadline: Deadline,
        cancel: Option<&'a CancellationToken>,
    ) -> impl Future<Output = WaitOutcome> + Send + 'a;

    /// Release the gate
    ///
    /// # Panics
    ///
    /// Releasing a gate that is not held is a broken protocol and panics.
    fn leave(&self);

    /// Check whether the gate is currently held
    fn is_held(&self) -> bool;
}
