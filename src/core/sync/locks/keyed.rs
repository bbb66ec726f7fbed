/*!
 * Keyed Lock (ref-counted)
 *
 * One gate per active key, created on first use and removed when the last
 * holder or waiter lets go. Supports unbounded key spaces, and nesting locks
 * on different keys is safe.
 *
 * # Entry Protocol
 *
 * - **Retain**: look the key up and bump the count while the map shard's read
 *   lock is held, which proves the entry is still installed. If absent,
 *   insert a fresh entry (count 1) only into a vacant slot; if another thread
 *   won that race, retry the lookup.
 * - **Release**: decrement; on reaching zero, remove the *same* `Arc` from the
 *   map only if the count is still zero under the shard's write lock. If a
 *   concurrent retain revived it, give up: the new holder removes it later.
 *
 * Retain retries, zero-removal never does. Because increments happen under
 * the read lock and the zero check under the write lock, a removed entry can
 * never be handed to a new caller.
 */

use super::acquire::{self, outcome_to_result, timeout_as_none};
use crate::core::errors::{LockError, LockResult};
use crate::core::guard::{Deadline, Guard, GuardMetadata, LockTimeout};
use crate::core::sync::cancel::{self, CancellationToken};
use crate::core::sync::config::LockConfig;
use crate::core::sync::gate::BinaryGate;
use crate::core::sync::traits::Gate;
use ahash::RandomState;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

const RESOURCE_TYPE: &str = "keyed_lock";

/// Per-key bookkeeping
struct Entry<K, G> {
    key: K,
    gate: G,
    /// Holders plus callers currently waiting on `gate`
    refs: AtomicUsize,
}

struct Shared<K, G> {
    entries: DashMap<K, Arc<Entry<K, G>>, RandomState>,
    config: LockConfig,
}

impl<K, G> Shared<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    /// Get-or-create the entry for `key` with one reference taken
    fn retain(self: &Arc<Self>, key: K) -> EntryRef<K, G> {
        loop {
            if let Some(current) = self.entries.get(&key) {
                current.refs.fetch_add(1, Ordering::AcqRel);
                return EntryRef {
                    shared: self.clone(),
                    entry: current.value().clone(),
                };
            }

            if let MapEntry::Vacant(slot) = self.entries.entry(key.clone()) {
                let entry = Arc::new(Entry {
                    key,
                    gate: G::default(),
                    refs: AtomicUsize::new(1),
                });
                slot.insert(entry.clone());
                trace!(resource_type = RESOURCE_TYPE, "lock entry created");
                return EntryRef {
                    shared: self.clone(),
                    entry,
                };
            }
            // Lost the creation race; the winner's entry is visible now
        }
    }

    /// Drop one reference, removing the entry if it was the last
    fn release(&self, entry: &Arc<Entry<K, G>>) {
        let previous = entry.refs.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            error!(
                resource_type = RESOURCE_TYPE,
                "lock entry released more often than retained"
            );
            panic!("lock protocol violation: entry reference count underflow");
        }
        if previous != 1 {
            return;
        }

        let removed = self.entries.remove_if(&entry.key, |_, current| {
            Arc::ptr_eq(current, entry) && current.refs.load(Ordering::Acquire) == 0
        });

        if removed.is_some() {
            trace!(resource_type = RESOURCE_TYPE, "lock entry removed");
        } else if entry.refs.load(Ordering::Acquire) > 0 {
            // Revived by a concurrent retain; its holder removes it later
            trace!(resource_type = RESOURCE_TYPE, "lock entry revived before removal");
        } else {
            // Revived, released and removed by a later holder
            trace!(resource_type = RESOURCE_TYPE, "lock entry already removed");
        }
    }
}

/// One counted reference to an entry; dropping it releases the reference
///
/// Held across the gate wait, so a dropped or failed acquisition always
/// undoes its retain.
struct EntryRef<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    shared: Arc<Shared<K, G>>,
    entry: Arc<Entry<K, G>>,
}

impl<K, G> Drop for EntryRef<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn drop(&mut self) {
        self.shared.release(&self.entry);
    }
}

/// Ref-counted per-key lock
///
/// Cheap to clone: clones share the same key map.
///
/// # Example
///
/// ```
/// use keyed_locks::KeyedLock;
///
/// let locks = KeyedLock::<u64>::new();
///
/// let guard = locks.acquire(42, None).unwrap();
/// assert!(locks.is_in_use(&42));
/// drop(guard);
///
/// assert!(!locks.is_in_use(&42));
/// assert!(locks.is_empty());
/// ```
pub struct KeyedLock<K, G = BinaryGate>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    shared: Arc<Shared<K, G>>,
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create with default configuration
    pub fn new() -> Self {
        Self::build(LockConfig::default())
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, G> Clone for KeyedLock<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K, G> KeyedLock<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    /// Create with explicit configuration
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration fails validation
    pub fn with_config(config: LockConfig) -> LockResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: LockConfig) -> Self {
        let entries = match config.shard_amount() {
            Some(shards) => DashMap::with_capacity_and_hasher_and_shard_amount(
                config.initial_capacity,
                RandomState::new(),
                shards,
            ),
            None => DashMap::with_capacity_and_hasher(config.initial_capacity, RandomState::new()),
        };

        Self {
            shared: Arc::new(Shared { entries, config }),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Block until `key` is acquired or `cancel` fires
    pub fn acquire(
        &self,
        key: K,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<KeyedGuard<K, G>> {
        self.acquire_timeout(key, LockTimeout::Infinite, cancel)
    }

    /// Block until `key` is acquired, `timeout` expires, or `cancel` fires
    ///
    /// # Errors
    ///
    /// - `Timeout` if the deadline passes first
    /// - `Cancelled` if the token fires first (or already had)
    ///
    /// The entry's reference is dropped before either error is returned.
    pub fn acquire_timeout(
        &self,
        key: K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<KeyedGuard<K, G>> {
        let deadline = Deadline::start(timeout.into());
        if cancel::is_cancelled(cancel) {
            return Err(LockError::Cancelled);
        }

        let reference = self.shared.retain(key);
        let outcome = acquire::wait_blocking(&reference.entry.gate, deadline, cancel);
        outcome_to_result(outcome, &deadline, RESOURCE_TYPE)?;
        Ok(KeyedGuard::new(reference))
    }

    /// Suspend until `key` is acquired or `cancel` fires
    pub async fn acquire_async(
        &self,
        key: K,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<KeyedGuard<K, G>> {
        self.acquire_timeout_async(key, LockTimeout::Infinite, cancel)
            .await
    }

    /// Suspend until `key` is acquired, `timeout` expires, or `cancel` fires
    ///
    /// Blocks for up to `sync_wait_budget` before suspending. Dropping the
    /// returned future mid-wait releases the reference it took.
    pub async fn acquire_timeout_async(
        &self,
        key: K,
        timeout: impl Into<LockTimeout>,
        cancel: Option<&CancellationToken>,
    ) -> LockResult<KeyedGuard<K, G>> {
        let deadline = Deadline::start(timeout.into());
        if cancel::is_cancelled(cancel) {
            return Err(LockError::Cancelled);
        }

        let reference = self.shared.retain(key);
        let outcome = acquire::wait_async(
            &reference.entry.gate,
            deadline,
            self.shared.config.sync_wait_budget,
            cancel,
        )
        .await;
        outcome_to_result(outcome, &deadline, RESOURCE_TYPE)?;
        Ok(KeyedGuard::new(reference))
    }

    /// Run `on_acquired` under the lock if it can be taken within `timeout`
    ///
    /// Returns `Ok(false)` on timeout without calling `on_acquired`. The lock
    /// is released when `on_acquired` returns (or unwinds).
    pub fn try_acquire<F>(
        &self,
        key: K,
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
        key: K,
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

    /// Take `key` only if it is free right now
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K, G>> {
        self.acquire_timeout(key, LockTimeout::poll(), None).ok()
    }

    /// Check whether `key` is currently held (not merely waited on)
    pub fn is_in_use<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .entries
            .get(key)
            .is_some_and(|entry| entry.gate.is_held())
    }

    /// Holders plus waiters currently referencing `key`
    pub fn reference_count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .entries
            .get(key)
            .map_or(0, |entry| entry.refs.load(Ordering::Acquire))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }
}

impl<K, G> fmt::Debug for KeyedLock<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLock")
            .field("entries", &self.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Guard for a key held in a [`KeyedLock`]
///
/// Releases the gate, then the entry reference, when dropped.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyedGuard<K, G = BinaryGate>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    // Dropped after `Drop::drop` has left the gate
    reference: EntryRef<K, G>,
    metadata: GuardMetadata,
}

impl<K, G> KeyedGuard<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn new(reference: EntryRef<K, G>) -> Self {
        Self {
            reference,
            metadata: GuardMetadata::new(RESOURCE_TYPE),
        }
    }

    /// The locked key
    pub fn key(&self) -> &K {
        &self.reference.entry.key
    }
}

impl<K, G> Guard for KeyedGuard<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }
}

impl<K, G> Drop for KeyedGuard<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    G: Gate + Default,
{
    fn drop(&mut self) {
        self.reference.entry.gate.leave();
        trace!(
            resource_type = RESOURCE_TYPE,
            held_us = self.metadata.lifetime_micros(),
            "lock released"
        );
    }
}

impl<K, G> fmt::Debug for KeyedGuard<K, G>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    G: Gate + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", self.key())
            .field("held_us", &self.metadata.lifetime_micros())
            .finish()
    }
}
