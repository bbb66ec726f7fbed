/*!
 * Acquisition Composition
 *
 * Time budgeting shared by both engines.
 *
 * # Policy
 *
 * Async acquisition first blocks for at most `sync_wait_budget` (or the
 * remaining timeout, if shorter), and only then suspends for the rest of
 * the timeout. Most holds are short, so the blocking attempt usually wins
 * and no waiter has to be registered with the async notifier.
 *
 * Both phases read one `Deadline`, so budget + remainder == timeout.
 */

use crate::core::errors::{LockError, LockResult};
use crate::core::guard::{Deadline, LockTimeout};
use crate::core::sync::cancel::{self, CancellationToken};
use crate::core::sync::traits::{Gate, WaitOutcome};
use std::time::Duration;
use tracing::debug;

/// Wait on a gate from a blocking thread
#[inline]
pub(crate) fn wait_blocking<G: Gate>(
    gate: &G,
    deadline: Deadline,
    cancel: Option<&CancellationToken>,
) -> WaitOutcome {
    gate.enter_blocking(deadline, cancel)
}

/// Wait on a gate from an async task: bounded blocking, then suspension
pub(crate) async fn wait_async<G: Gate>(
    gate: &G,
    deadline: Deadline,
    budget: Duration,
    cancel: Option<&CancellationToken>,
) -> WaitOutcome {
    if cancel::is_cancelled(cancel) {
        return WaitOutcome::Cancelled;
    }

    let blocking = deadline.capped(budget);
    let first = if blocking.is_zero() {
        if gate.try_enter() {
            WaitOutcome::Acquired
        } else {
            WaitOutcome::TimedOut
        }
    } else {
        gate.enter_blocking(Deadline::start(LockTimeout::After(blocking)), cancel)
    };

    match first {
        WaitOutcome::TimedOut if !deadline.is_expired() => {
            gate.enter_async(deadline, cancel).await
        }
        outcome => outcome,
    }
}

/// Map a wait outcome onto the error taxonomy
pub(crate) fn outcome_to_result(
    outcome: WaitOutcome,
    deadline: &Deadline,
    resource_type: &'static str,
) -> LockResult<()> {
    match outcome {
        WaitOutcome::Acquired => Ok(()),
        WaitOutcome::TimedOut => {
            debug!(
                resource_type,
                elapsed_ms = deadline.elapsed().as_millis() as u64,
                "lock wait timed out"
            );
            Err(deadline.timeout_error())
        }
        WaitOutcome::Cancelled => {
            debug!(
                resource_type,
                elapsed_ms = deadline.elapsed().as_millis() as u64,
                "lock wait cancelled"
            );
            Err(LockError::Cancelled)
        }
    }
}

/// Collapse an acquire result into the `try_*` contract
///
/// Timeouts become `Ok(None)`; cancellation and invalid arguments stay errors.
pub(crate) fn timeout_as_none<T>(result: LockResult<T>) -> LockResult<Option<T>> {
    match result {
        Ok(guard) => Ok(Some(guard)),
        Err(LockError::Timeout { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
