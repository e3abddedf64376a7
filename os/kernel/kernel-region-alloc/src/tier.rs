//! One rung of the block-size ladder.

use crate::PhysicalAddress;
use crate::bitmap::{HierarchicalBitmap, SearchDirection};
use crate::region::{PAGE_SHIFT, Region};

/// Free-block tracking for a single block order across the whole region.
///
/// Block indices are counted from [`start_aligned`](Self::start_aligned),
/// which is the region base rounded down to the *next* tier's block size.
/// This keeps the blocks of one parent at consecutive, parent-aligned indices
/// so that promotion is a plain range check.
///
/// ### Invariants
/// - Only blocks lying wholly inside the region are ever marked free.
/// - `free_count` equals the number of set leaf bits.
pub struct Tier {
    order: u32,
    next_order: Option<u32>,
    start_aligned: PhysicalAddress,
    /// First block index that does not reach below the region base.
    first_block: usize,
    /// Blocks ending at or before the region end.
    block_count_truncated: usize,
    /// Blocks touching the region, including a trailing partial one; sizes the bitmap.
    block_count_rounded: usize,
    free_count: usize,
    bitmap: HierarchicalBitmap,
}

impl Tier {
    pub(crate) fn new(region: &Region, order: u32, next_order: Option<u32>) -> Self {
        debug_assert!(next_order.is_none_or(|next| next > order));
        let alignment = 1u64 << next_order.unwrap_or(order);
        let start_aligned = region.base().align_down(alignment);

        let span = region.end() - start_aligned;
        let leading = region.base() - start_aligned;
        let block_count_rounded = span.div_ceil(1 << order) as usize;
        let block_count_truncated = (span >> order) as usize;
        let first_block = leading.div_ceil(1 << order) as usize;

        Self {
            order,
            next_order,
            start_aligned,
            first_block,
            block_count_truncated,
            block_count_rounded,
            free_count: 0,
            bitmap: HierarchicalBitmap::new(block_count_rounded),
        }
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> u32 {
        self.order
    }

    #[inline]
    #[must_use]
    pub const fn next_order(&self) -> Option<u32> {
        self.next_order
    }

    #[inline]
    #[must_use]
    pub const fn start_aligned(&self) -> PhysicalAddress {
        self.start_aligned
    }

    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> u64 {
        1 << self.order
    }

    #[inline]
    #[must_use]
    pub const fn block_pages(&self) -> u64 {
        1 << (self.order - PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_count
    }

    #[inline]
    #[must_use]
    pub const fn block_count_truncated(&self) -> usize {
        self.block_count_truncated
    }

    #[inline]
    #[must_use]
    pub const fn block_count_rounded(&self) -> usize {
        self.block_count_rounded
    }

    /// Pages currently held free by this tier.
    #[inline]
    #[must_use]
    pub const fn free_pages(&self) -> u64 {
        self.free_count as u64 * self.block_pages()
    }

    /// Whether `address` starts a block of this tier.
    #[inline]
    #[must_use]
    pub const fn is_block_aligned(&self, address: PhysicalAddress) -> bool {
        address.is_aligned(self.block_size())
    }

    #[inline]
    fn block_index(&self, address: PhysicalAddress) -> usize {
        debug_assert!(self.is_block_aligned(address));
        ((address - self.start_aligned) >> self.order) as usize
    }

    #[inline]
    fn block_address(&self, index: usize) -> PhysicalAddress {
        self.start_aligned + ((index as u64) << self.order)
    }

    #[inline]
    fn is_inside_region(&self, index: usize) -> bool {
        (self.first_block..self.block_count_truncated).contains(&index)
    }

    /// Takes one free block, preferring the given end of the region.
    ///
    /// Returns `None` if this tier holds no free block; the caller moves on to
    /// a tier with larger blocks.
    pub(crate) fn find_free_block(&mut self, direction: SearchDirection) -> Option<PhysicalAddress> {
        let index = self.bitmap.find(direction)?;
        self.bitmap.clear(index);
        self.free_count -= 1;

        let address = self.block_address(index);
        log::trace!("tier {}: took block {index} at {address}", self.order);
        Some(address)
    }

    /// Marks the block at `address` as free and returns its index.
    pub(crate) fn release_block(&mut self, address: PhysicalAddress) -> usize {
        let index = self.block_index(address);
        debug_assert!(
            self.is_inside_region(index),
            "block {index} of tier {} is not inside the region",
            self.order
        );
        self.bitmap.set(index);
        self.free_count += 1;
        index
    }

    /// Whether the block at `address` is currently free in this tier.
    #[must_use]
    pub fn is_block_free(&self, address: PhysicalAddress) -> bool {
        let index = self.block_index(address);
        index < self.block_count_rounded && self.bitmap.is_set(index)
    }

    /// Checks whether the sibling group around `index` is complete.
    ///
    /// On success the whole group is removed from this tier and the address of
    /// the enclosing next-tier block is returned, which the caller must release
    /// one tier up.
    pub(crate) fn try_promote(&mut self, index: usize) -> Option<PhysicalAddress> {
        let next_order = self.next_order?;
        let group = 1usize << (next_order - self.order);
        let first = index & !(group - 1);
        if first + group > self.block_count_truncated || !self.bitmap.all_set(first, group) {
            return None;
        }

        self.bitmap.clear_range(first, group);
        self.free_count -= group;

        let parent = self.block_address(first);
        log::trace!(
            "tier {}: promoting {group} blocks at {parent} to tier {next_order}",
            self.order
        );
        Some(parent)
    }

    #[cfg(test)]
    pub(crate) fn bitmap_consistent(&self) -> bool {
        self.bitmap.summaries_consistent() && self.bitmap.count_set() == self.free_count
    }

    /// Whether some complete sibling group is still sitting in this tier.
    #[cfg(test)]
    pub(crate) fn has_unpromoted_group(&self) -> bool {
        let Some(next_order) = self.next_order else {
            return false;
        };
        let group = 1usize << (next_order - self.order);
        (0..self.block_count_truncated)
            .step_by(group)
            .any(|first| first + group <= self.block_count_truncated && self.bitmap.all_set(first, group))
    }
}

impl core::fmt::Debug for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tier")
            .field("order", &self.order)
            .field("next_order", &self.next_order)
            .field("start_aligned", &self.start_aligned)
            .field("block_count_truncated", &self.block_count_truncated)
            .field("block_count_rounded", &self.block_count_rounded)
            .field("free_count", &self.free_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::PAGE_SIZE;

    fn region(base: u64, pages: u64) -> Region {
        Region::new(PhysicalAddress::new(base), pages * PAGE_SIZE)
    }

    #[test]
    fn geometry_of_aligned_region() {
        let r = region(0x10_0000, 64);
        let tier = Tier::new(&r, 12, Some(16));
        assert_eq!(tier.start_aligned(), r.base());
        assert_eq!(tier.block_count_truncated(), 64);
        assert_eq!(tier.block_count_rounded(), 64);
        assert_eq!(tier.block_pages(), 1);

        let top = Tier::new(&r, 16, None);
        assert_eq!(top.block_pages(), 16);
        assert_eq!(top.block_count_truncated(), 4);
    }

    #[test]
    fn geometry_of_unaligned_region() {
        // 20 pages starting 3 pages into a 64 KiB block.
        let r = region(0x10_3000, 20);
        let tier = Tier::new(&r, 12, Some(16));
        assert_eq!(tier.start_aligned().as_u64(), 0x10_0000);
        assert_eq!(tier.block_count_truncated(), 23);
        assert_eq!(tier.first_block, 3);

        let top = Tier::new(&r, 16, None);
        assert_eq!(top.start_aligned().as_u64(), 0x10_0000);
        assert_eq!(top.block_count_truncated(), 1);
        assert_eq!(top.block_count_rounded(), 2);
        assert_eq!(top.first_block, 1);
    }

    #[test]
    fn find_and_release_round_trip() {
        let r = region(0x10_0000, 64);
        let mut tier = Tier::new(&r, 12, Some(16));
        tier.release_block(r.page_address(5));
        tier.release_block(r.page_address(40));
        assert_eq!(tier.free_count(), 2);
        assert!(tier.is_block_free(r.page_address(5)));

        assert_eq!(
            tier.find_free_block(SearchDirection::Descending),
            Some(r.page_address(40))
        );
        assert_eq!(
            tier.find_free_block(SearchDirection::Descending),
            Some(r.page_address(5))
        );
        assert_eq!(tier.find_free_block(SearchDirection::Ascending), None);
        assert_eq!(tier.free_count(), 0);
        assert!(tier.bitmap_consistent());
    }

    #[test]
    fn promotion_requires_complete_group() {
        let r = region(0x10_0000, 32);
        let mut tier = Tier::new(&r, 12, Some(14));
        for page in 4..7 {
            let index = tier.release_block(r.page_address(page));
            assert_eq!(tier.try_promote(index), None);
        }
        let index = tier.release_block(r.page_address(7));
        assert_eq!(tier.try_promote(index), Some(r.page_address(4)));
        assert_eq!(tier.free_count(), 0);
        assert!(tier.bitmap_consistent());
    }

    #[test]
    fn top_tier_never_promotes() {
        let r = region(0x10_0000, 16);
        let mut top = Tier::new(&r, 16, None);
        let index = top.release_block(r.base());
        assert_eq!(top.try_promote(index), None);
        assert_eq!(top.free_pages(), 16);
    }
}
