/*!
 * Keyed Locks
 * Fine-grained mutual exclusion keyed by arbitrary values
 *
 * Two engines:
 * - `KeyedLock`: one gate per live key, reference counted, safe to nest
 * - `StripedLock`: fixed array of gates picked by hash, no per-key allocation
 *
 * Both support blocking and async acquisition with optional timeout and
 * cancellation. Guards release on drop.
 */

pub mod core;
pub mod facade;

// Re-exports
pub use crate::core::errors::{LockError, LockResult};
pub use crate::core::guard::{Deadline, Guard, GuardMetadata, LockTimeout};
pub use crate::core::sync::{
    BinaryGate, CancelRegistration, CancellationToken, Gate, HashIndexer, IntegerIndexer,
    KeyIndexer, KeyedGuard, KeyedLock, LockConfig, StripeGuard, StripedLock, WaitOutcome,
    DEFAULT_SLOT_COUNT, DEFAULT_SYNC_WAIT_BUDGET,
};
