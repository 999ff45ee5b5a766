//! Position-addressed KV cache bookkeeping.
//!
//! The cache is an arena of storage slots plus, per sequence, an ordered map
//! from logical position to slot. Removing or shifting a range of positions
//! only rewrites the index; slot memory never moves. Freed slots return to a
//! free list, the same way the block manager recycles blocks.
//!
//! ## Layout
//!
//! ```text
//! seq 0:  pos 0 -> slot 3   pos 1 -> slot 0   pos 2 -> slot 7
//!
//! shift(seq 0, from 1, delta -1) after remove(seq 0, 0..1):
//! seq 0:  pos 0 -> slot 0   pos 1 -> slot 7          (slot 3 is free)
//! ```
//!
//! Each slot records the token that produced it. A real backend keeps the key
//! and value tensors for that slot alongside; here the token is enough to
//! check that the cache mirrors what was evaluated.
//!
//! ## Example
//!
//! ```
//! use nano_speculative::core::kv_cache::KvCache;
//!
//! let mut cache = KvCache::new(8);
//! for (pos, token) in [10, 11, 12, 13].into_iter().enumerate() {
//!     cache.insert(0, pos, token).unwrap();
//! }
//!
//! cache.remove(0, 0, Some(1));
//! cache.shift(0, 1, None, -1);
//!
//! assert_eq!(cache.tokens(0), vec![11, 12, 13]);
//! assert_eq!(cache.num_free_slots(), 5);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::core::{SequenceId, TokenId};
use crate::error::{Error, Result};

/// Contents of one occupied storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    token: TokenId,
}

/// Arena-backed KV cache index.
#[derive(Debug, Clone)]
pub struct KvCache {
    /// Storage slots; `None` means free.
    slots: Vec<Option<Slot>>,
    /// Free slot ids.
    free_list: VecDeque<usize>,
    /// Per-sequence position -> slot index.
    sequences: HashMap<SequenceId, BTreeMap<usize, usize>>,
}

impl KvCache {
    /// Create a cache with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            free_list: (0..capacity).collect(),
            sequences: HashMap::new(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots.
    pub fn num_free_slots(&self) -> usize {
        self.free_list.len()
    }

    /// Number of occupied slots.
    pub fn num_used_slots(&self) -> usize {
        self.capacity() - self.num_free_slots()
    }

    /// Number of positions cached for `seq`.
    pub fn len(&self, seq: SequenceId) -> usize {
        self.sequences.get(&seq).map_or(0, BTreeMap::len)
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.num_used_slots() == 0
    }

    /// Highest cached position for `seq`.
    pub fn max_pos(&self, seq: SequenceId) -> Option<usize> {
        self.sequences
            .get(&seq)
            .and_then(|positions| positions.keys().next_back().copied())
    }

    /// Token cached at `pos` for `seq`.
    pub fn get(&self, seq: SequenceId, pos: usize) -> Option<TokenId> {
        let slot = *self.sequences.get(&seq)?.get(&pos)?;
        self.slots[slot].map(|s| s.token)
    }

    /// Storage slot backing `pos` for `seq`.
    pub fn slot_of(&self, seq: SequenceId, pos: usize) -> Option<usize> {
        self.sequences.get(&seq)?.get(&pos).copied()
    }

    /// Cached tokens for `seq`, in position order.
    pub fn tokens(&self, seq: SequenceId) -> Vec<TokenId> {
        self.sequences
            .get(&seq)
            .map(|positions| {
                positions
                    .values()
                    .filter_map(|&slot| self.slots[slot].map(|s| s.token))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cache `token` at `pos` for `seq`.
    ///
    /// Overwrites in place if the position is already cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheFull`] if a new slot is needed and none is free.
    pub fn insert(&mut self, seq: SequenceId, pos: usize, token: TokenId) -> Result<usize> {
        if let Some(slot) = self.slot_of(seq, pos) {
            self.slots[slot] = Some(Slot { token });
            return Ok(slot);
        }

        let slot = self.free_list.pop_front().ok_or(Error::CacheFull)?;
        self.slots[slot] = Some(Slot { token });
        self.sequences.entry(seq).or_default().insert(pos, slot);
        Ok(slot)
    }

    /// Drop every sequence and free every slot.
    pub fn clear(&mut self) {
        self.sequences.clear();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.free_list = (0..self.slots.len()).collect();
    }

    /// Remove positions `[from, to)` of `seq`; `to = None` means to the end.
    ///
    /// Returns the number of positions removed.
    pub fn remove(&mut self, seq: SequenceId, from: usize, to: Option<usize>) -> usize {
        let Some(positions) = self.sequences.get_mut(&seq) else {
            return 0;
        };

        let doomed = take_range(positions, from, to);
        let removed = doomed.len();
        for (_, slot) in doomed {
            self.release(slot);
        }
        removed
    }

    /// Add `delta` to every position in `[from, to)` of `seq`.
    ///
    /// Entries shifted below position zero are removed. An entry shifted onto
    /// a position outside the range that is already cached replaces it.
    pub fn shift(&mut self, seq: SequenceId, from: usize, to: Option<usize>, delta: isize) {
        if delta == 0 {
            return;
        }
        let Some(positions) = self.sequences.get_mut(&seq) else {
            return;
        };

        let moved = take_range(positions, from, to);
        let mut released = Vec::new();
        for (pos, slot) in moved {
            match pos.checked_add_signed(delta) {
                Some(new_pos) => {
                    if let Some(old) = positions.insert(new_pos, slot) {
                        released.push(old);
                    }
                }
                None => released.push(slot),
            }
        }
        for slot in released {
            self.release(slot);
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.free_list.push_back(slot);
    }
}

/// Detach `[from, to)` from `positions`, returned in ascending order.
fn take_range(
    positions: &mut BTreeMap<usize, usize>,
    from: usize,
    to: Option<usize>,
) -> Vec<(usize, usize)> {
    let mut tail = positions.split_off(&from);
    let rest = match to {
        Some(to) if to > from => tail.split_off(&to),
        Some(_) => std::mem::take(&mut tail),
        None => BTreeMap::new(),
    };
    positions.extend(rest);
    tail.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(tokens: &[TokenId]) -> KvCache {
        let mut cache = KvCache::new(16);
        for (pos, &token) in tokens.iter().enumerate() {
            cache.insert(0, pos, token).unwrap();
        }
        cache
    }

    #[test]
    fn test_remove_middle_range() {
        let mut cache = filled(&[1, 2, 3, 4, 5]);

        assert_eq!(cache.remove(0, 1, Some(3)), 2);

        assert_eq!(cache.tokens(0), vec![1, 4, 5]);
        assert_eq!(cache.get(0, 3), Some(4));
        assert_eq!(cache.get(0, 1), None);
        assert_eq!(cache.num_used_slots(), 3);
    }

    #[test]
    fn test_empty_range_is_noop() {
        let mut cache = filled(&[1, 2, 3]);

        assert_eq!(cache.remove(0, 2, Some(2)), 0);
        assert_eq!(cache.remove(0, 2, Some(1)), 0);
        assert_eq!(cache.tokens(0), vec![1, 2, 3]);
    }

    #[test]
    fn test_shift_keeps_slots() {
        let mut cache = filled(&[1, 2, 3, 4]);
        let slot = cache.slot_of(0, 2).unwrap();

        cache.remove(0, 0, Some(2));
        cache.shift(0, 2, None, -2);

        assert_eq!(cache.slot_of(0, 0), Some(slot));
        assert_eq!(cache.tokens(0), vec![3, 4]);
        assert_eq!(cache.max_pos(0), Some(1));
    }

    #[test]
    fn test_shift_below_zero_drops_entries() {
        let mut cache = filled(&[1, 2, 3]);

        cache.shift(0, 0, None, -1);

        assert_eq!(cache.tokens(0), vec![2, 3]);
        assert_eq!(cache.num_used_slots(), 2);
    }

    #[test]
    fn test_insert_overwrites_and_fills() {
        let mut cache = KvCache::new(2);
        cache.insert(0, 0, 1).unwrap();
        cache.insert(0, 0, 9).unwrap();
        cache.insert(0, 1, 2).unwrap();

        assert_eq!(cache.tokens(0), vec![9, 2]);
        assert!(matches!(cache.insert(0, 2, 3), Err(Error::CacheFull)));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.num_free_slots(), 2);
    }

    #[test]
    fn test_sequences_are_independent() {
        let mut cache = KvCache::new(8);
        cache.insert(0, 0, 1).unwrap();
        cache.insert(1, 0, 2).unwrap();

        cache.remove(0, 0, None);

        assert_eq!(cache.len(0), 0);
        assert_eq!(cache.tokens(1), vec![2]);
    }
}
