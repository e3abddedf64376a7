//! The ordered set of tiers and the operations that span several of them.
//!
//! Every free page of the region is held by exactly one set leaf bit: the
//! bit of the largest block that has been coalesced around it. Taking a block
//! larger than needed splits it and hands the excess straight back; releasing
//! pages re-forms the largest possible blocks and promotes complete sibling
//! groups upwards.

use crate::bitmap::SearchDirection;
use crate::config::TierLadderConfig;
use crate::error::AllocError;
use crate::page_range::PageRangeList;
use crate::region::Region;
use crate::tier::Tier;
use crate::PhysicalAddress;
use alloc::vec::Vec;

pub(crate) struct TierLadder {
    /// Smallest block order first.
    tiers: Vec<Tier>,
}

impl TierLadder {
    /// Builds the ladder with every page of `region` free.
    pub(crate) fn new(region: &Region, config: TierLadderConfig) -> Self {
        let orders = config.orders;
        let tiers = orders
            .iter()
            .enumerate()
            .map(|(i, &order)| Tier::new(region, order, orders.get(i + 1).copied()))
            .collect();

        let mut ladder = Self { tiers };
        ladder.release_run(region.base(), region.page_count());
        ladder
    }

    #[inline]
    pub(crate) fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub(crate) fn free_page_count(&self) -> u64 {
        self.tiers.iter().map(Tier::free_pages).sum()
    }

    /// Hands out a block of tier `index`, splitting a larger block if this
    /// tier has nothing free.
    ///
    /// For [`SearchDirection::Descending`] the top end of a split block is
    /// kept so that the two cursors stay apart.
    pub(crate) fn take_block(
        &mut self,
        index: usize,
        direction: SearchDirection,
    ) -> Option<PhysicalAddress> {
        let wanted = self.tiers[index].block_pages();
        for source in index..self.tiers.len() {
            let Some(address) = self.tiers[source].find_free_block(direction) else {
                continue;
            };

            let excess = self.tiers[source].block_pages() - wanted;
            if excess == 0 {
                return Some(address);
            }

            log::trace!(
                "splitting tier {} block at {address} for tier {}",
                self.tiers[source].order(),
                self.tiers[index].order()
            );
            return Some(match direction {
                SearchDirection::Ascending => {
                    self.release_run(address.add_pages(wanted), excess);
                    address
                }
                SearchDirection::Descending => {
                    self.release_run(address, excess);
                    address.add_pages(excess)
                }
            });
        }
        None
    }

    /// Assembles `page_count` pages from as few blocks as possible.
    ///
    /// Either the full count is granted or nothing is: on failure every block
    /// taken so far goes back to the ladder before returning.
    pub(crate) fn allocate_fragmented(
        &mut self,
        page_count: u64,
        direction: SearchDirection,
    ) -> Result<PageRangeList, AllocError> {
        if self.free_page_count() < page_count {
            return Err(AllocError::OutOfMemory);
        }

        let mut granted = PageRangeList::new();
        let mut remaining = page_count;

        for index in (0..self.tiers.len()).rev() {
            let block_pages = self.tiers[index].block_pages();
            while remaining >= block_pages {
                let Some(address) = self.take_block(index, direction) else {
                    break;
                };
                granted.push(address, block_pages);
                remaining -= block_pages;
            }
            if remaining == 0 {
                break;
            }
        }

        if remaining == 0 {
            return Ok(granted);
        }

        for range in &granted {
            self.release_run(range.address, range.page_count);
        }
        Err(AllocError::OutOfMemory)
    }

    /// Hands out one contiguous run of `page_count` pages whose start is
    /// aligned to `align_pages` pages when the request is served from the
    /// block start.
    pub(crate) fn allocate_contiguous(
        &mut self,
        page_count: u64,
        align_pages: u64,
        direction: SearchDirection,
    ) -> Result<PhysicalAddress, AllocError> {
        debug_assert!(page_count > 0 && align_pages.is_power_of_two());
        let needed = page_count.max(align_pages);
        let index = self
            .tiers
            .iter()
            .position(|tier| tier.block_pages() >= needed)
            .ok_or(AllocError::OutOfMemory)?;

        let address = self
            .take_block(index, direction)
            .ok_or(AllocError::OutOfMemory)?;

        let excess = self.tiers[index].block_pages() - page_count;
        if excess == 0 {
            return Ok(address);
        }

        // A descending request without alignment constraints keeps the top end.
        if direction == SearchDirection::Descending && align_pages == 1 {
            self.release_run(address, excess);
            Ok(address.add_pages(excess))
        } else {
            self.release_run(address.add_pages(page_count), excess);
            Ok(address)
        }
    }

    /// Returns `page_count` pages at `address` to the ladder.
    ///
    /// The run is cut into the largest blocks that are aligned at the cursor
    /// and fit in what is left, so every page ends up in as few releases as
    /// possible.
    pub(crate) fn release_run(&mut self, address: PhysicalAddress, page_count: u64) {
        let mut cursor = address;
        let mut remaining = page_count;
        while remaining > 0 {
            let index = self
                .tiers
                .iter()
                .rposition(|tier| tier.is_block_aligned(cursor) && tier.block_pages() <= remaining)
                .unwrap_or(0);
            let block_pages = self.tiers[index].block_pages();
            self.release_block(index, cursor);
            cursor = cursor.add_pages(block_pages);
            remaining -= block_pages;
        }
    }

    /// Releases one block and keeps promoting while sibling groups complete.
    fn release_block(&mut self, mut index: usize, mut address: PhysicalAddress) {
        loop {
            let tier = &mut self.tiers[index];
            let block = tier.release_block(address);
            let Some(parent) = tier.try_promote(block) else {
                return;
            };
            index += 1;
            address = parent;
        }
    }

    /// Checks the bitmap summaries, the free counters and that no complete
    /// sibling group was left unpromoted.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.tiers
            .iter()
            .all(|tier| tier.bitmap_consistent() && !tier.has_unpromoted_group())
    }
}
