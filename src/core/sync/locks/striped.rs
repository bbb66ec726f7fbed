/*!
 * Lock Striping Pattern
 * Fixed array of gates shared by an unbounded key space
 */

use super::acquire::{self, outcome_to_result, timeout_as_none};
use super::indexer::{HashIndexer, KeyIndexer};
use crate::core::errors::{LockError, LockResult};
use crate::core::guard::{Deadline, Guard, GuardMetadata, LockTimeout};
use crate::core::sync::cancel::{self, CancellationToken};
use crate::core::sync::config::LockConfig;
use crate::core::sync::gate::BinaryGate;
use crate::core::sync::traits::Gate;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

const RESOURCE_TYPE: &str = "striped_lock";

/// A single gate, cache-line aligned to prevent false sharing
#[repr(C, align(64))]
struct Slot<G> {
    gate: G,
}

struct Shared<I, G> {
    slots: Box<[Slot<G>]>,
    indexer: I,
    config: LockConfig,
}

/// Lock-striped keyed lock
///
/// # Performance
///
/// - **No per-key allocation**: all gates are created up front
/// - **Typical slot count**: thousands (default 4096); collisions shrink as it grows
/// - **Best for**: hot paths over large key sets with short holds
///
/// # Hazards
///
/// Two keys that hash to the same slot serialize against each other, and
/// `is_in_use` may report a colliding key's hold. Never hold two guards from
/// the same instance at once: if both keys share a slot, the second acquire
/// deadlocks.
///
/// # Example
///
/// ```
/// use keyed_locks::{IntegerIndexer, LockConfig, StripedLock};
///
/// let locks = StripedLock::<u32, _>::with_indexer(
///     LockConfig::default().with_slot_count(64),
///     IntegerIndexer,
/// )
/// .unwrap();
///
/// let guard = locks.acquire(&7, None).unwrap();
/// assert_eq!(guard.slot(), 7);
/// assert!(locks.is_in_use(&71)); // 71 % 64 == 7
/// ```
pub struct StripedLock<K: ?Sized, I = HashIndexer, G = BinaryGate>
where
    I: KeyIndexer<K>,
    G: Gate + Default,
{
    shared: Arc<Shared<I, G>>,
    _key: PhantomData<fn(&K)>,
}

impl<K: Hash + ?Sized> StripedLock<K> {
    /// Create with default configuration and hash indexing
    pub fn new() -> Self {
        Self::build(LockConfig::default(), HashIndexer::new())
    }

    /// Create with explicit configuration and hash indexing
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `slot_count` is zero
    pub fn with_config(config: LockConfig) -> LockResult<Self> {
        Self::with_indexer(config, HashIndexer::new())
    }
}

impl<K: Hash + ?Sized> Default for StripedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, I, G> Clone for StripedLock<K, I, G>
where
    K: ?Sized,
    I: KeyIndexer<K>,
    G: Gate + Default,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _key: PhantomData,
        }
    }
}

impl<K, I, G> StripedLock<K, I, G>
where
    K: ?Sized,
    I: KeyIndexer<K>,
    G: Gate + Default,
{
    /// Create with a custom indexer
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `slot_count` is zero
    pub fn with_indexer(config: LockConfig, indexer: I) -> LockResult<Self> {
        config.validate()?;
        Ok(Self::build(config, indexer))
    }

    fn build(config: LockConfig, indexer: I) -> Self {
        let slots: Box<[Slot<G>]> = (0..config.slot_count)
            .map(|_| Slot { gate: G::default() })
            .collect();

        Self {
            shared: Arc::new(Shared {
                slots,
                indexer,
                config,
            }),
            _key: PhantomData,
        }
    }

    /// Number of gates
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.shared.slots.len()
    }

    /// Slot a key maps to
    #[inline]
    pub fn slot_index(&self, key: &K) -> usize {
        self.shared.indexer.slot(key, self.shared.slots.len())
    }

    /// Engine configuration
    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Block until the key's slot is acquired or `cancel` fires
    pub fn acquire(
        &self,
        key: &K,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<StripeGuard<G>> {
        self.acquire_timeout(key, LockTimeout::Infinite, cancel)
    }

    /// Block until the key's slot is acquired, `timeout` expires, or `cancel` fires
    pub fn acquire_timeout(
        &self,
        key: &K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<StripeGuard<G>> {
        let deadline = Deadline::start(timeout.into());
        if cancel::is_cancelled(cancel) {
            return Err(LockError::Cancelled);
        }

        let index = self.slot_index(key);
        let outcome = acquire::wait_blocking(&self.shared.slots[index].gate, deadline, cancel);
        outcome_to_result(outcome, &deadline, RESOURCE_TYPE)?;
        Ok(StripeGuard::new(self.shared.clone(), index))
    }

    /// Suspend until the key's slot is acquired or `cancel` fires
    pub async fn acquire_async(
        &self,
        key: &K,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<StripeGuard<G>> {
        self.acquire_timeout_async(key, LockTimeout::Infinite, cancel)
            .await
    }

    /// Suspend until the key's slot is acquired, `timeout` expires, or `cancel` fires
    ///
    /// Blocks for up to `sync_wait_budget` before suspending.
    pub async fn acquire_timeout_async(
        &self,
        key: &K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<StripeGuard<G>> {
        let deadline = Deadline::start(timeout.into());
        if cancel::is_cancelled(cancel) {
            return Err(LockError::Cancelled);
        }

        let index = self.slot_index(key);
        let outcome = acquire::wait_async(
            &self.shared.slots[index].gate,
            deadline,
            self.shared.config.sync_wait_budget,
            cancel,
        )
        .await;
        outcome_to_result(outcome, &deadline, RESOURCE_TYPE)?;
        Ok(StripeGuard::new(self.shared.clone(), index))
    }

    /// Run `on_acquired` under the lock if it can be taken within `timeout`
    ///
    /// Returns `Ok(false)` on timeout without calling `on_acquired`.
    pub fn try_acquire<F>(
        &self,
        key: &K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
        on_acquired: F,
    ) -> LockResult<bool>
    where
        F: FnOnce(),
    {
        match timeout_as_none(self.acquire_timeout(key, timeout, cancel))? {
            Some(_guard) => {
                on_acquired();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Async counterpart of [`try_acquire`](Self::try_acquire)
    pub async fn try_acquire_async<F, Fut>(
        &self,
        key: &K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
        on_acquired: F,
    ) -> LockResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let acquired = self.acquire_timeout_async(key, timeout, cancel).await;
        match timeout_as_none(acquired)? {
            Some(_guard) => {
                on_acquired().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Take the key's slot only if it is free right now
    pub fn try_lock(&self, key: &K) -> Option<StripeGuard<G>> {
        let index = self.slot_index(key);
        self.shared.slots[index]
            .gate
            .try_enter()
            .then(|| StripeGuard::new(self.shared.clone(), index))
    }

    /// Check whether the key's slot is held
    ///
    /// May be `true` because a different key shares the slot.
    pub fn is_in_use(&self, key: &K) -> bool {
        self.shared.slots[self.slot_index(key)].gate.is_held()
    }
}

impl<K, I, G> fmt::Debug for StripedLock<K, I, G>
where
    K: ?Sized,
    I: KeyIndexer<K>,
    G: Gate + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedLock")
            .field("slot_count", &self.slot_count())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Guard for a slot held in a [`StripedLock`]
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct StripeGuard<G: Gate + Default = BinaryGate> {
    slots: Arc<dyn SlotTable<G>>,
    index: usize,
    metadata: GuardMetadata,
}

/// Type-erased view of the slot array, so guards don't carry the indexer type
trait SlotTable<G>: Send + Sync {
    fn gate(&self, index: usize) -> &G;
}

impl<I: Send + Sync, G: Gate> SlotTable<G> for Shared<I, G> {
    #[inline]
    fn gate(&self, index: usize) -> &G {
        &self.slots[index].gate
    }
}

impl<G: Gate + Default> StripeGuard<G> {
    fn new<I: Send + Sync + 'static>(shared: Arc<Shared<I, G>>, index: usize) -> Self {
        Self {
            slots: shared,
            index,
            metadata: GuardMetadata::new(RESOURCE_TYPE),
        }
    }

    /// Index of the held slot
    #[inline]
    pub fn slot(&self) -> usize {
        self.index
    }
}

impl<G: Gate + Default> Guard for StripeGuard<G> {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }
}

impl<G: Gate + Default> Drop for StripeGuard<G> {
    fn drop(&mut self) {
        self.slots.gate(self.index).leave();
        trace!(
            resource_type = RESOURCE_TYPE,
            slot = self.index,
            held_us = self.metadata.lifetime_micros(),
            "lock released"
        );
    }
}

impl<G: Gate + Default> fmt::Debug for StripeGuard<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGuard")
            .field("slot", &self.index)
            .field("held_us", &self.metadata.lifetime_micros())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::locks::IntegerIndexer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_operations() {
        let locks = StripedLock::<str>::with_config(LockConfig::default().with_slot_count(8))
            .unwrap();
        assert_eq!(locks.slot_count(), 8);

        let guard = locks.acquire("key1", None).unwrap();
        assert!(locks.is_in_use("key1"));
        assert_eq!(guard.slot(), locks.slot_index("key1"));

        drop(guard);
        assert!(!locks.is_in_use("key1"));
    }

    #[test]
    fn test_zero_slots_rejected() {
        let err = StripedLock::<u32>::with_config(LockConfig::default().with_slot_count(0))
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
    }

    #[test]
    fn test_colliding_keys_share_slot() {
        let locks =
            StripedLock::<u64, _>::with_indexer(LockConfig::default().with_slot_count(4), IntegerIndexer)
                .unwrap();

        let _guard = locks.try_lock(&1).unwrap();
        // 5 % 4 == 1
        assert!(locks.is_in_use(&5));
        assert!(locks.try_lock(&5).is_none());
        assert!(locks.try_lock(&2).is_some());
    }

    #[test]
    fn test_timeout_on_held_slot() {
        let locks = StripedLock::<u32>::new();
        let _guard = locks.acquire(&1, None).unwrap();

        let err = locks
            .acquire_timeout(&1, Duration::from_millis(20), None)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_single_slot_serializes() {
        let locks =
            StripedLock::<usize>::with_config(LockConfig::default().with_slot_count(1)).unwrap();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|scope| {
            for key in 0..8usize {
                let locks = &locks;
                let active = &active;
                let peak = &peak;
                scope.spawn(move || {
                    let _guard = locks.acquire(&key, None).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slots_are_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<Slot<BinaryGate>>(), 64);
    }
}
