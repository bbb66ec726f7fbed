/*!
 * Binary Gate
 *
 * Default `Gate` implementation: one atomic flag, parking_lot_core parking
 * for blocked threads, and a tokio `Notify` for suspended tasks.
 *
 * # Design
 *
 * - Lock-free fast path (single compare-exchange)
 * - Blocked threads park on the flag's address, like a futex
 * - Every release wakes one parked thread and one suspended task; the loser
 *   re-checks and goes back to waiting (no fairness is promised)
 * - A waiter that leaves without entering forwards its wakeup if the gate
 *   is free, so timeouts and cancellations never strand other waiters
 */

use super::cancel::{self, CancellationToken};
use super::traits::{Gate, WaitOutcome};
use crate::core::guard::Deadline;
use parking_lot_core::{park, unpark_all, unpark_one, ParkToken, UnparkToken};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::error;

/// Binary exclusive gate usable from threads and tasks alike
pub struct BinaryGate {
    held: AtomicBool,
    /// Threads currently parked (or about to park) on `held`
    sleepers: AtomicUsize,
    notify: Notify,
}

impl BinaryGate {
    /// Create a free gate
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            sleepers: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Stable parking address for this gate
    #[inline]
    fn park_addr(&self) -> usize {
        &self.held as *const AtomicBool as usize
    }

    /// Wake one parked thread and one suspended task
    fn wake_next(&self) {
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            // SAFETY: the address is only used as a parking key
            unsafe {
                unpark_one(self.park_addr(), |_| UnparkToken(0));
            }
        }
        self.notify.notify_one();
    }

    /// Pass on a wakeup a departing waiter may have consumed
    fn forward_wakeup(&self) {
        if !self.held.load(Ordering::SeqCst) {
            self.wake_next();
        }
    }
}

impl Default for BinaryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BinaryGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryGate")
            .field("held", &self.is_held())
            .field("sleepers", &self.sleepers.load(Ordering::Relaxed))
            .finish()
    }
}

impl Gate for BinaryGate {
    #[inline]
    fn try_enter(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    fn enter_blocking(
        &self,
        deadline: Deadline,
        cancel: Option<&CancellationToken>,
    ) -> WaitOutcome {
        if cancel::is_cancelled(cancel) {
            return WaitOutcome::Cancelled;
        }
        if self.try_enter() {
            return WaitOutcome::Acquired;
        }

        let addr = self.park_addr();
        let _registration = cancel.map(|token| {
            token.on_cancel(move || {
                // SAFETY: the address is only used as a parking key
                unsafe {
                    unpark_all(addr, UnparkToken(0));
                }
            })
        });
        let timeout_at = deadline.instant();

        let outcome = loop {
            if cancel::is_cancelled(cancel) {
                break WaitOutcome::Cancelled;
            }
            if self.try_enter() {
                break WaitOutcome::Acquired;
            }
            if deadline.is_expired() {
                break WaitOutcome::TimedOut;
            }

            self.sleepers.fetch_add(1, Ordering::SeqCst);
            // SAFETY: the validate callback only reads atomics and never panics
            unsafe {
                park(
                    addr,
                    || self.held.load(Ordering::SeqCst) && !cancel::is_cancelled(cancel),
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    timeout_at,
                );
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
        };

        if !outcome.is_acquired() {
            self.forward_wakeup();
        }
        outcome
    }

    fn enter_async<'a>(
        &'a self,
        deadline: Deadline,
        cancel: Option<&'a CancellationToken>,
    ) -> impl Future<Output = WaitOutcome> + Send + 'a {
        async move {
            if cancel::is_cancelled(cancel) {
                return WaitOutcome::Cancelled;
            }

            let outcome = loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if cancel::is_cancelled(cancel) {
                    break WaitOutcome::Cancelled;
                }
                if self.try_enter() {
                    break WaitOutcome::Acquired;
                }
                let remaining = deadline.remaining();
                if remaining == Some(Duration::ZERO) {
                    break WaitOutcome::TimedOut;
                }

                let expiry = async {
                    match remaining {
                        Some(left) => tokio::time::sleep(left).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = &mut notified => {}
                    _ = cancel::cancelled(cancel) => {}
                    _ = expiry => {}
                }
            };

            if !outcome.is_acquired() {
                self.forward_wakeup();
            }
            outcome
        }
    }

    fn leave(&self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            error!(gate = ?self, "gate released while not held");
            panic!("lock protocol violation: gate released while not held");
        }
        self.wake_next();
    }

    #[inline]
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guard::LockTimeout;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn within(ms: u64) -> Deadline {
        Deadline::start(LockTimeout::After(Duration::from_millis(ms)))
    }

    #[test]
    fn test_try_enter_and_leave() {
        let gate = BinaryGate::new();
        assert!(!gate.is_held());

        assert!(gate.try_enter());
        assert!(gate.is_held());
        assert!(!gate.try_enter());

        gate.leave();
        assert!(!gate.is_held());
        assert!(gate.try_enter());
    }

    #[test]
    #[should_panic(expected = "gate released while not held")]
    fn test_leave_unheld_panics() {
        BinaryGate::new().leave();
    }

    #[test]
    fn test_blocking_timeout() {
        let gate = BinaryGate::new();
        assert!(gate.try_enter());

        let start = Instant::now();
        assert_eq!(gate.enter_blocking(within(50), None), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(gate.is_held());
    }

    #[test]
    fn test_blocking_handoff() {
        let gate = Arc::new(BinaryGate::new());
        assert!(gate.try_enter());

        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.enter_blocking(Deadline::never(), None));

        thread::sleep(Duration::from_millis(50));
        gate.leave();

        assert_eq!(handle.join().unwrap(), WaitOutcome::Acquired);
        assert!(gate.is_held());
    }

    #[test]
    fn test_blocking_cancel_wakes_parked_thread() {
        let gate = Arc::new(BinaryGate::new());
        let token = CancellationToken::new();
        assert!(gate.try_enter());

        let waiter = gate.clone();
        let waiter_token = token.clone();
        let handle =
            thread::spawn(move || waiter.enter_blocking(Deadline::never(), Some(&waiter_token)));

        thread::sleep(Duration::from_millis(50));
        token.cancel();

        assert_eq!(handle.join().unwrap(), WaitOutcome::Cancelled);
        assert!(gate.is_held());
    }

    #[test]
    fn test_cancelled_token_wins_over_free_gate() {
        let gate = BinaryGate::new();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(
            gate.enter_blocking(Deadline::never(), Some(&token)),
            WaitOutcome::Cancelled
        );
        assert!(!gate.is_held());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_handoff_from_thread() {
        let gate = Arc::new(BinaryGate::new());
        assert!(gate.try_enter());

        let releaser = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            releaser.leave();
        });

        let outcome = gate.enter_async(within(1000), None).await;
        assert_eq!(outcome, WaitOutcome::Acquired);
    }

    #[tokio::test]
    async fn test_async_timeout() {
        let gate = BinaryGate::new();
        assert!(gate.try_enter());

        let outcome = gate.enter_async(within(30), None).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_async_waiter_forwards_wakeup() {
        let gate = Arc::new(BinaryGate::new());
        assert!(gate.try_enter());

        // First waiter gives up, second must still be woken
        let quitter = gate.enter_async(within(10), None);
        assert_eq!(quitter.await, WaitOutcome::TimedOut);

        let waiter = gate.clone();
        let handle =
            tokio::spawn(async move { waiter.enter_async(Deadline::never(), None).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.leave();

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("second waiter should be woken")
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Acquired);
    }
}
