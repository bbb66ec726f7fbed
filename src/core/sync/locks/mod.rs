/*!
 * Keyed Lock Engines
 *
 * Two ways of mapping keys onto mutual-exclusion gates:
 * - Keyed (dynamic): one gate per live key, created and removed on demand
 * - Striped: a fixed array of gates, keys share a slot when they collide
 */

mod acquire;
mod indexer;
mod keyed;
mod striped;

pub use indexer::{HashIndexer, IntegerIndexer, KeyIndexer};
pub use keyed::{KeyedGuard, KeyedLock};
pub use striped::{StripeGuard, StripedLock};
