/*!
 * Key Indexers
 *
 * Map a key onto a striped slot. Purely a performance concern: any
 * deterministic function is correct.
 *
 * - `HashIndexer`: any `Hash` key, via ahash with fixed seeds
 * - `IntegerIndexer`: primitive integers, no hashing at all
 *
 * All reduction is done on `u64`, so signed keys never produce a negative
 * remainder.
 */

use ahash::RandomState;
use std::hash::Hash;

/// Maps keys of type `K` to slot indices
pub trait KeyIndexer<K: ?Sized>: Send + Sync + 'static {
    /// Stable 64-bit value for the key
    fn hash_key(&self, key: &K) -> u64;

    /// Slot in `[0, slot_count)`
    #[inline]
    fn slot(&self, key: &K, slot_count: usize) -> usize {
        debug_assert!(slot_count > 0);
        (self.hash_key(key) % slot_count as u64) as usize
    }
}

/// Generic hash-based indexer
///
/// Seeds are fixed so a key maps to the same slot in every instance.
#[derive(Clone)]
pub struct HashIndexer {
    state: RandomState,
}

impl HashIndexer {
    const SEEDS: [u64; 4] = [
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    ];

    pub fn new() -> Self {
        let [k0, k1, k2, k3] = Self::SEEDS;
        Self {
            state: RandomState::with_seeds(k0, k1, k2, k3),
        }
    }
}

impl Default for HashIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HashIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashIndexer")
    }
}

impl<K: Hash + ?Sized> KeyIndexer<K> for HashIndexer {
    #[inline]
    fn hash_key(&self, key: &K) -> u64 {
        self.state.hash_one(key)
    }
}

/// Identity indexer for primitive integers
///
/// Sequential ids land in sequential slots, which is the ideal spread.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerIndexer;

macro_rules! impl_integer_indexer {
    ($($int:ty => $unsigned:ty),* $(,)?) => {
        $(
            impl KeyIndexer<$int> for IntegerIndexer {
                #[inline(always)]
                fn hash_key(&self, key: &$int) -> u64 {
                    // Reinterpret signed values as their unsigned bit pattern
                    *key as $unsigned as u64
                }
            }
        )*
    };
}

impl_integer_indexer! {
    u8 => u8,
    u16 => u16,
    u32 => u32,
    u64 => u64,
    usize => usize,
    i8 => u8,
    i16 => u16,
    i32 => u32,
    i64 => u64,
    isize => usize,
}

impl KeyIndexer<u128> for IntegerIndexer {
    #[inline(always)]
    fn hash_key(&self, key: &u128) -> u64 {
        (*key as u64) ^ ((*key >> 64) as u64)
    }
}

impl KeyIndexer<i128> for IntegerIndexer {
    #[inline(always)]
    fn hash_key(&self, key: &i128) -> u64 {
        <Self as KeyIndexer<u128>>::hash_key(self, &(*key as u128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_integer_identity() {
        let indexer = IntegerIndexer;
        assert_eq!(indexer.slot(&5u32, 16), 5);
        assert_eq!(indexer.slot(&21u64, 16), 5);
        assert_eq!(indexer.slot(&0usize, 1), 0);
    }

    #[test]
    fn test_negative_keys_stay_in_range() {
        let indexer = IntegerIndexer;
        // -1i32 reinterpreted as u32::MAX
        assert_eq!(indexer.slot(&-1i32, 10), (u32::MAX % 10) as usize);
        assert_eq!(indexer.slot(&i64::MIN, 7), ((i64::MIN as u64) % 7) as usize);
        assert!(indexer.slot(&-1i128, 3) < 3);
    }

    #[test]
    fn test_hash_indexer_deterministic_across_instances() {
        let a = HashIndexer::new();
        let b = HashIndexer::default();
        for key in ["alpha", "beta", "gamma"] {
            assert_eq!(a.slot(key, 4096), b.slot(key, 4096));
        }
    }

    #[test]
    fn test_hash_indexer_borrowed_keys() {
        let indexer = HashIndexer::new();
        let owned = String::from("order-42");
        assert_eq!(
            indexer.hash_key(&owned),
            <HashIndexer as KeyIndexer<str>>::hash_key(&indexer, "order-42")
        );
    }

    #[test]
    fn test_hash_indexer_distribution() {
        let indexer = HashIndexer::new();
        let mut counts = vec![0; 8];
        for i in 0..1000u32 {
            counts[indexer.slot(&i, 8)] += 1;
        }

        // Each slot should have roughly 1000/8 = 125 keys
        for count in counts {
            assert!(count > 50 && count < 250, "Bad distribution: {}", count);
        }
    }

    proptest! {
        #[test]
        fn prop_signed_slot_in_range(key in any::<i64>(), slots in 1usize..10_000) {
            prop_assert!(IntegerIndexer.slot(&key, slots) < slots);
        }

        #[test]
        fn prop_hash_slot_in_range(key in ".*", slots in 1usize..10_000) {
            prop_assert!(HashIndexer::new().slot(&key, slots) < slots);
        }
    }
}
