//! Hierarchical 64-ary free bitmap.
//!
//! ```text
//! level 0 (root)   [ 0 1 0 0 ... ]                 1 word
//!                      │
//! level 1          [ .. ] [ 0 0 1 0 ... ] [ .. ]   ⌈n / 64²⌉ words
//!                              │
//! level 2 (leaf)   ......  [ 0 0 0 1 1 0 ... ]     ⌈n / 64⌉ words, one bit per block
//! ```
//!
//! A leaf bit is set iff its block is free. A summary bit is set iff the
//! 64-bit word it stands for at the level below has at least one bit set.
//! Finding a free block is a descent from the root picking one set bit per
//! level, so the cost is bounded by the depth of the tree.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

const WORD_BITS: usize = u64::BITS as usize;

/// Which end of the region a search prefers.
///
/// Two allocation cursors growing towards each other keep long-lived and
/// short-lived allocations apart. The direction is a preference, not a
/// guarantee of placement.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum SearchDirection {
    /// Prefer the lowest free block.
    #[default]
    Ascending,
    /// Prefer the highest free block.
    Descending,
}

impl SearchDirection {
    /// Position of the preferred set bit in a non-zero word.
    #[inline]
    const fn pick(self, word: u64) -> usize {
        debug_assert!(word != 0);
        match self {
            Self::Ascending => word.trailing_zeros() as usize,
            Self::Descending => (u64::BITS - 1 - word.leading_zeros()) as usize,
        }
    }
}

pub(crate) struct HierarchicalBitmap {
    /// `levels[0]` is the root, the last entry holds the leaf bits.
    levels: Vec<Box<[u64]>>,
    bit_count: usize,
}

impl HierarchicalBitmap {
    /// A bitmap of `bit_count` leaf bits, all clear.
    pub(crate) fn new(bit_count: usize) -> Self {
        let mut bits = bit_count.max(1);
        let mut level_bits = vec![bits];
        while bits > WORD_BITS {
            bits = bits.div_ceil(WORD_BITS);
            level_bits.push(bits);
        }

        let levels = level_bits
            .into_iter()
            .rev()
            .map(|bits| vec![0u64; bits.div_ceil(WORD_BITS)].into_boxed_slice())
            .collect();

        Self { levels, bit_count }
    }

    #[cfg(test)]
    pub(crate) const fn bit_count(&self) -> usize {
        self.bit_count
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    fn leaf(&self) -> &[u64] {
        &self.levels[self.levels.len() - 1]
    }

    #[inline]
    pub(crate) fn is_set(&self, index: usize) -> bool {
        debug_assert!(index < self.bit_count);
        self.leaf()[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Locates a set leaf bit without modifying the bitmap.
    ///
    /// Returns `None` as soon as a word on the descent path is empty.
    pub(crate) fn find(&self, direction: SearchDirection) -> Option<usize> {
        let mut index = 0;
        for level in &self.levels {
            let word = level[index];
            if word == 0 {
                return None;
            }
            index = index * WORD_BITS + direction.pick(word);
        }
        debug_assert!(index < self.bit_count);
        Some(index)
    }

    pub(crate) fn set(&mut self, index: usize) {
        debug_assert!(index < self.bit_count);
        debug_assert!(!self.is_set(index), "bit {index} is already set");
        self.set_bits(index / WORD_BITS, 1 << (index % WORD_BITS));
    }

    pub(crate) fn clear(&mut self, index: usize) {
        debug_assert!(index < self.bit_count);
        debug_assert!(self.is_set(index), "bit {index} is already clear");
        self.clear_bits(index / WORD_BITS, 1 << (index % WORD_BITS));
    }

    /// Whether every leaf bit in `start..start + len` is set.
    pub(crate) fn all_set(&self, start: usize, len: usize) -> bool {
        debug_assert!(start + len <= self.bit_count);
        let leaf = self.leaf();
        Self::word_masks(start, len).all(|(word, mask)| leaf[word] & mask == mask)
    }

    /// Clears every leaf bit in `start..start + len`; all of them must be set.
    pub(crate) fn clear_range(&mut self, start: usize, len: usize) {
        debug_assert!(self.all_set(start, len));
        for (word, mask) in Self::word_masks(start, len) {
            self.clear_bits(word, mask);
        }
    }

    /// Sets `mask` in the leaf word at `word_index`, then marks the summary
    /// bits above for as long as the modified word was empty before.
    fn set_bits(&mut self, mut word_index: usize, mut mask: u64) {
        for level in self.levels.iter_mut().rev() {
            let word = &mut level[word_index];
            let was_empty = *word == 0;
            *word |= mask;
            if !was_empty {
                return;
            }
            mask = 1 << (word_index % WORD_BITS);
            word_index /= WORD_BITS;
        }
    }

    /// Clears `mask` in the leaf word at `word_index`, then clears the summary
    /// bits above for as long as the modified word became empty.
    fn clear_bits(&mut self, mut word_index: usize, mut mask: u64) {
        for level in self.levels.iter_mut().rev() {
            let word = &mut level[word_index];
            *word &= !mask;
            if *word != 0 {
                return;
            }
            mask = 1 << (word_index % WORD_BITS);
            word_index /= WORD_BITS;
        }
    }

    /// Splits a bit range into `(word index, mask)` pairs.
    fn word_masks(start: usize, len: usize) -> impl Iterator<Item = (usize, u64)> {
        let end = start + len;
        let mut cursor = start;
        core::iter::from_fn(move || {
            if cursor >= end {
                return None;
            }
            let shift = cursor % WORD_BITS;
            let n = (WORD_BITS - shift).min(end - cursor);
            let mask = if n == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << n) - 1) << shift
            };
            let word = cursor / WORD_BITS;
            cursor += n;
            Some((word, mask))
        })
    }

    /// Verifies that every summary bit matches the word below it.
    #[cfg(test)]
    pub(crate) fn summaries_consistent(&self) -> bool {
        self.levels.windows(2).all(|pair| {
            let (upper, lower) = (&pair[0], &pair[1]);
            lower.iter().enumerate().all(|(i, &word)| {
                let summary = upper[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0;
                summary == (word != 0)
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn count_set(&self) -> usize {
        self.leaf().iter().map(|w| w.count_ones() as usize).sum()
    }
}
