/*!
 * Synchronization Primitives
 *
 * Building blocks for per-key mutual exclusion:
 * - `Gate`: binary semaphore usable from threads and async tasks
 * - `CancellationToken`: cooperative cancellation for waits
 * - `LockConfig`: engine tuning
 * - `locks`: the keyed and striped engines
 *
 * # Architecture
 *
 * Blocked threads park on the gate's address (parking_lot_core), async
 * waiters suspend on a tokio `Notify`. Every release wakes one of each, and
 * the loser of the race re-parks.
 */

pub(crate) mod cancel;
mod config;
pub(crate) mod gate;
pub mod locks;
mod traits;

pub use cancel::{CancelRegistration, CancellationToken};
pub use config::{LockConfig, DEFAULT_SLOT_COUNT, DEFAULT_SYNC_WAIT_BUDGET};
pub use gate::BinaryGate;
pub use locks::{
    HashIndexer, IntegerIndexer, KeyIndexer, KeyedGuard, KeyedLock, StripeGuard, StripedLock,
};
pub use traits::{Gate, WaitOutcome};
