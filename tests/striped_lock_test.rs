/*!
 * Striped Lock Integration Tests
 *
 * Slot mapping, collision behavior, and async acquisition
 */

use keyed_locks::{
    CancellationToken, Guard, HashIndexer, IntegerIndexer, KeyIndexer, LockConfig, LockError,
    LockTimeout, StripedLock,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_single_slot_serializes_distinct_keys() {
    let locks = StripedLock::<str>::with_config(LockConfig::default().with_slot_count(1)).unwrap();
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|scope| {
        for name in ["alpha", "beta", "gamma", "delta"] {
            let locks = &locks;
            let active = &active;
            let peak = &peak;
            scope.spawn(move || {
                for _ in 0..20 {
                    let _guard = locks.acquire(name, None).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(!locks.is_in_use("alpha"));
}

#[test]
fn test_distinct_slots_hold_concurrently() {
    let locks = StripedLock::<u32, _>::with_indexer(
        LockConfig::default().with_slot_count(4),
        IntegerIndexer,
    )
    .unwrap();
    // Every thread must hold its slot while the others arrive
    let barrier = Barrier::new(4);

    thread::scope(|scope| {
        for key in 0..4u32 {
            let locks = &locks;
            let barrier = &barrier;
            scope.spawn(move || {
                let guard = locks
                    .acquire_timeout(&key, Duration::from_secs(2), None)
                    .unwrap();
                assert_eq!(guard.slot(), key as usize);
                barrier.wait();
            });
        }
    });
}

#[test]
fn test_collision_is_visible() {
    let locks = StripedLock::<i64, _>::with_indexer(
        LockConfig::default().with_slot_count(10),
        IntegerIndexer,
    )
    .unwrap();

    let guard = locks.acquire(&3, None).unwrap();
    assert!(locks.is_in_use(&13));
    assert!(!locks.is_in_use(&4));

    let err = locks
        .acquire_timeout(&13, Duration::from_millis(20), None)
        .unwrap_err();
    assert!(err.is_timeout());

    guard.release();
    assert!(!locks.is_in_use(&13));
}

#[test]
fn test_default_construction() {
    let locks = StripedLock::<String>::new();
    assert_eq!(locks.slot_count(), keyed_locks::DEFAULT_SLOT_COUNT);
    assert_eq!(locks.config(), &LockConfig::default());

    let key = "user:17".to_string();
    let index = locks.slot_index(&key);
    assert!(index < locks.slot_count());
    assert_eq!(index, HashIndexer::new().slot(&key, locks.slot_count()));
}

#[test]
fn test_zero_slot_count_rejected() {
    let err = StripedLock::<u64, _>::with_indexer(
        LockConfig::default().with_slot_count(0),
        IntegerIndexer,
    )
    .unwrap_err();
    assert!(matches!(err, LockError::InvalidArgument(_)));
}

#[test]
fn test_try_acquire_semantics() {
    let locks = StripedLock::<u64>::new();
    let guard = locks.acquire(&1, None).unwrap();
    let calls = AtomicUsize::new(0);

    let acquired = locks
        .try_acquire(&1, Duration::from_millis(15), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(!acquired);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    drop(guard);
    let acquired = locks
        .try_acquire(&1, LockTimeout::Infinite, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(acquired);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!locks.is_in_use(&1));
}

#[test]
fn test_cancelled_token_leaves_slot_free() {
    let locks = StripedLock::<u64>::new();
    let token = CancellationToken::new();
    token.cancel();

    assert_eq!(locks.acquire(&2, Some(&token)).unwrap_err(), LockError::Cancelled);
    assert!(!locks.is_in_use(&2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_mutual_exclusion() {
    let locks = StripedLock::<u64>::with_config(LockConfig::default().with_slot_count(16)).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let locks = locks.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire_async(&99, None).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(!locks.is_in_use(&99));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_timeout_and_cancel() {
    let locks = StripedLock::<u64>::new();
    let guard = locks.acquire_async(&5, None).await.unwrap();

    let err = locks
        .acquire_timeout_async(&5, Duration::from_millis(30), None)
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });
    let err = locks.acquire_async(&5, Some(&token)).await.unwrap_err();
    assert!(err.is_cancelled());

    drop(guard);
    let acquired = locks
        .try_acquire_async(&5, Duration::from_millis(100), None, || async {})
        .await
        .unwrap();
    assert!(acquired);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_guard_released_in_other_task() {
    let locks = StripedLock::<u64>::new();
    let guard = locks.acquire_async(&8, None).await.unwrap();

    tokio::spawn(async move { drop(guard) }).await.unwrap();

    assert!(locks.try_lock(&8).is_some());
}

proptest! {
    #[test]
    fn prop_signed_keys_map_in_range(key in any::<i32>(), slots in 1usize..512) {
        let locks = StripedLock::<i32, _>::with_indexer(
            LockConfig::default().with_slot_count(slots),
            IntegerIndexer,
        )
        .unwrap();
        prop_assert!(locks.slot_index(&key) < slots);
    }

    #[test]
    fn prop_slot_index_is_deterministic(key in "[a-z0-9:]{1,24}") {
        let a = StripedLock::<str>::new();
        let b = StripedLock::<str>::new();
        prop_assert_eq!(a.slot_index(&key), b.slot_index(&key));
    }
}
