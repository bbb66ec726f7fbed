/*!
 * Lock Configuration
 *
 * Construction parameters shared by both lock engines
 */

use crate::core::errors::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// Default number of striped slots
pub const DEFAULT_SLOT_COUNT: usize = 4096;

/// Default bounded blocking wait before an async acquire suspends
pub const DEFAULT_SYNC_WAIT_BUDGET: Duration = Duration::from_millis(10);

/// Upper bound on keyed map shards, whatever the concurrency hint
const MAX_SHARDS: usize = 1 << 16;

/// Lock engine configuration
///
/// `slot_count` only affects `StripedLock`; `concurrency_hint` and
/// `initial_capacity` only affect `KeyedLock` and are sizing hints with no
/// correctness impact.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Number of pre-allocated gates for striping
    pub slot_count: usize,
    /// Blocking wait tried before async suspension (zero = single poll)
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "sync_wait_budget_ms")]
    pub sync_wait_budget: Duration,
    /// Expected number of concurrently locking threads (shard count hint)
    pub concurrency_hint: Option<usize>,
    /// Expected number of simultaneously locked keys
    pub initial_capacity: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            sync_wait_budget: DEFAULT_SYNC_WAIT_BUDGET,
            concurrency_hint: None,
            initial_capacity: 0,
        }
    }
}

impl LockConfig {
    /// Configuration for very short critical sections (< 1ms hold expected)
    pub const fn low_latency() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            sync_wait_budget: Duration::from_millis(1),
            concurrency_hint: None,
            initial_capacity: 0,
        }
    }

    /// Configuration for long holds: suspend immediately instead of blocking
    pub const fn long_wait() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            sync_wait_budget: Duration::ZERO,
            concurrency_hint: None,
            initial_capacity: 0,
        }
    }

    /// Set number of striped slots
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Set blocking budget for async acquisition
    pub fn with_sync_wait_budget(mut self, budget: Duration) -> Self {
        self.sync_wait_budget = budget;
        self
    }

    /// Set shard count hint for the keyed map
    pub fn with_concurrency_hint(mut self, hint: usize) -> Self {
        self.concurrency_hint = Some(hint);
        self
    }

    /// Set initial capacity hint for the keyed map
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Check values that would make an engine unusable
    pub fn validate(&self) -> LockResult<()> {
        if self.slot_count == 0 {
            return Err(LockError::invalid("slot_count must be greater than zero"));
        }
        if self.concurrency_hint == Some(0) {
            return Err(LockError::invalid("concurrency_hint must be greater than zero"));
        }
        Ok(())
    }

    /// Shard amount for dashmap: power of two in `[2, MAX_SHARDS]`
    pub(crate) fn shard_amount(&self) -> Option<usize> {
        self.concurrency_hint.map(|hint| {
            hint.saturating_mul(4)
                .checked_next_power_of_two()
                .unwrap_or(MAX_SHARDS)
                .clamp(2, MAX_SHARDS)
        })
    }

    /// Load overrides from the environment on top of defaults
    ///
    /// Environment variables:
    /// - KEYED_LOCKS_SLOT_COUNT
    /// - KEYED_LOCKS_SYNC_WAIT_BUDGET_MS
    /// - KEYED_LOCKS_CONCURRENCY_HINT
    /// - KEYED_LOCKS_INITIAL_CAPACITY
    pub fn from_env() -> LockResult<Self> {
        let mut config = Self::default();

        if let Some(slots) = env_number("KEYED_LOCKS_SLOT_COUNT")? {
            config.slot_count = slots as usize;
        }
        if let Some(ms) = env_number("KEYED_LOCKS_SYNC_WAIT_BUDGET_MS")? {
            config.sync_wait_budget = Duration::from_millis(ms);
        }
        if let Some(hint) = env_number("KEYED_LOCKS_CONCURRENCY_HINT")? {
            config.concurrency_hint = Some(hint as usize);
        }
        if let Some(capacity) = env_number("KEYED_LOCKS_INITIAL_CAPACITY")? {
            config.initial_capacity = capacity as usize;
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_number(key: &str) -> LockResult<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| LockError::invalid(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
