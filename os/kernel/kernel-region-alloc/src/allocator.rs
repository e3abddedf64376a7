use crate::backing::{BackingStore, NoBackingStore};
use crate::bitmap::SearchDirection;
use crate::config::RegionConfig;
use crate::error::{AllocError, ConfigError};
use crate::ladder::TierLadder;
use crate::page_range::{PageRange, PageRangeList};
use crate::refcount::ReferenceTable;
use crate::region::{PAGE_SHIFT, Region};
use crate::tier::Tier;
use crate::PhysicalAddress;
use log::debug;
use spin::{Mutex, MutexGuard};

/// Physical page allocator for one guest memory region.
///
/// All tier state sits behind a single lock. Reference counts live outside of
/// it: increments and decrements that do not reach zero are lock-free, the
/// final decrement of a page takes the lock so the page can be handed back to
/// the tiers in the same critical section.
///
/// # Example
/// ```rust
/// use kernel_region_alloc::{PhysicalAddress, RegionAllocator, SearchDirection};
///
/// let heap = RegionAllocator::new(PhysicalAddress::new(0x8000_0000), 64 << 20)?;
/// let pages = heap.allocate_fragmented(3, SearchDirection::Ascending)?;
/// assert_eq!(pages.total_pages(), 3);
///
/// for range in &pages {
///     heap.free(range.address, range.page_count);
/// }
/// assert_eq!(heap.free_page_count(), heap.total_page_count());
/// # Ok::<(), Box<dyn core::error::Error>>(())
/// ```
pub struct RegionAllocator<B: BackingStore = NoBackingStore> {
    region: Region,
    ladder: Mutex<TierLadder>,
    references: ReferenceTable,
    backing: B,
}

impl RegionAllocator {
    /// An allocator over `[base, base + size)` using the default tier ladder.
    ///
    /// # Errors
    /// If the region is empty, unaligned or overflows the address space.
    pub fn new(base: PhysicalAddress, size: u64) -> Result<Self, ConfigError> {
        Self::with_config(RegionConfig::new(base, size), NoBackingStore)
    }
}

impl<B: BackingStore> RegionAllocator<B> {
    /// # Errors
    /// See [`RegionConfig::validate`].
    pub fn with_config(config: RegionConfig, backing: B) -> Result<Self, ConfigError> {
        config.validate()?;

        let region = Region::new(config.base, config.size);
        let ladder = TierLadder::new(&region, config.ladder);
        let references = ReferenceTable::new(region.page_count() as usize);

        debug!(
            "Region allocator managing {}..{} ({} pages) with tier orders {:?}",
            region.base(),
            region.end(),
            region.page_count(),
            config.ladder.orders
        );

        Ok(Self {
            region,
            ladder: Mutex::new(ladder),
            references,
            backing,
        })
    }

    #[inline]
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    #[inline]
    #[must_use]
    pub const fn backing_store(&self) -> &B {
        &self.backing
    }

    #[inline]
    #[must_use]
    pub const fn total_page_count(&self) -> u64 {
        self.region.page_count()
    }

    /// Pages not held by any allocation.
    #[must_use]
    pub fn free_page_count(&self) -> u64 {
        self.ladder.lock().free_page_count()
    }

    /// Pages held by at least one owner.
    #[must_use]
    pub fn used_page_count(&self) -> u64 {
        self.total_page_count() - self.free_page_count()
    }

    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.ladder.lock().tiers().len()
    }

    /// Runs `f` on the tier ladder, smallest block order first, under the lock.
    pub fn with_tiers<R>(&self, f: impl FnOnce(&[Tier]) -> R) -> R {
        f(self.ladder.lock().tiers())
    }

    /// See [`Region::page_offset`].
    #[inline]
    #[must_use]
    pub fn page_offset(&self, address: PhysicalAddress) -> u64 {
        self.region.page_offset(address)
    }

    /// See [`Region::page_offset_from_end`].
    #[inline]
    #[must_use]
    pub fn page_offset_from_end(&self, address: PhysicalAddress) -> u64 {
        self.region.page_offset_from_end(address)
    }

    /// Current reference count of the page containing `address`.
    #[must_use]
    pub fn reference_count(&self, address: PhysicalAddress) -> u32 {
        self.references.get(self.page_index(address))
    }

    /// Allocates `page_count` pages, possibly spread over several ranges.
    ///
    /// Large blocks are used first so the result has as few entries as
    /// possible. Every granted page starts with one reference.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the region cannot supply the pages; in
    /// that case nothing has been allocated.
    pub fn allocate_fragmented(
        &self,
        page_count: u64,
        direction: SearchDirection,
    ) -> Result<PageRangeList, AllocError> {
        if page_count == 0 {
            return Ok(PageRangeList::new());
        }

        let pages = {
            let mut ladder = self.ladder.lock();
            ladder
                .allocate_fragmented(page_count, direction)
                .inspect_err(|_| Self::log_exhausted(&ladder, page_count, "fragmented"))?
        };

        for range in &pages {
            self.open_range(*range);
        }
        Ok(pages)
    }

    /// Allocates `page_count` physically contiguous pages.
    ///
    /// The request is served from the smallest tier whose blocks are large
    /// enough; the unused part of that block goes straight back to the pool.
    /// The backing store is asked to commit the range before it is returned.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no large enough block is free.
    ///
    /// # Panics
    /// If `page_count` is zero.
    pub fn allocate_contiguous(
        &self,
        page_count: u64,
        direction: SearchDirection,
    ) -> Result<PhysicalAddress, AllocError> {
        self.allocate_contiguous_aligned(page_count, 1, direction)
    }

    /// Like [`allocate_contiguous`](Self::allocate_contiguous), but the start
    /// address is a multiple of `align_pages` pages.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no large enough block is free.
    ///
    /// # Panics
    /// If `page_count` is zero or `align_pages` is not a power of two.
    pub fn allocate_contiguous_aligned(
        &self,
        page_count: u64,
        align_pages: u64,
        direction: SearchDirection,
    ) -> Result<PhysicalAddress, AllocError> {
        assert!(page_count > 0, "contiguous allocation of zero pages");
        assert!(
            align_pages.is_power_of_two(),
            "alignment of {align_pages} pages is not a power of two"
        );

        let address = {
            let mut ladder = self.ladder.lock();
            ladder
                .allocate_contiguous(page_count, align_pages, direction)
                .inspect_err(|_| Self::log_exhausted(&ladder, page_count, "contiguous"))?
        };

        self.open_range(PageRange::new(address, page_count));
        self.backing.commit(address, page_count << PAGE_SHIFT);
        Ok(address)
    }

    /// Drops one reference from every page in the range; pages left without
    /// owners go back to the pool.
    ///
    /// # Panics
    /// If the range leaves the region or a page in it is not allocated.
    pub fn free(&self, address: PhysicalAddress, page_count: u64) {
        self.decrement_reference(address, page_count);
    }

    /// Frees every range of an allocation result.
    pub fn free_pages(&self, pages: &PageRangeList) {
        for range in pages {
            self.free(range.address, range.page_count);
        }
    }

    /// Adds an owner to every page in an already allocated range.
    ///
    /// # Panics
    /// If the range leaves the region or a page in it is not allocated.
    pub fn increment_reference(&self, address: PhysicalAddress, page_count: u64) {
        self.region.check_range(address, page_count);
        let first = self.page_index(address);
        for page in first..first + page_count as usize {
            self.references.increment(page);
        }
    }

    /// Adds an owner to every page of an allocation result.
    pub fn increment_references(&self, pages: &PageRangeList) {
        for range in pages {
            self.increment_reference(range.address, range.page_count);
        }
    }

    /// Removes an owner from every page in the range.
    ///
    /// Counts that stay above zero are updated without the lock. Once a page
    /// reaches zero the lock is taken for the rest of the call and every
    /// maximal run of pages hitting zero is released to the tiers in one go.
    ///
    /// # Panics
    /// If the range leaves the region or a page in it is not allocated.
    pub fn decrement_reference(&self, address: PhysicalAddress, page_count: u64) {
        if page_count == 0 {
            return;
        }
        self.region.check_range(address, page_count);

        let first = self.page_index(address);
        let mut ladder: Option<MutexGuard<'_, TierLadder>> = None;
        let mut run: Option<PageRange> = None;

        for page in first..first + page_count as usize {
            if self.references.release_shared(page) {
                Self::flush_run(ladder.as_deref_mut(), &mut run);
                continue;
            }

            let guard = ladder.get_or_insert_with(|| self.ladder.lock());
            if self.references.release(page) > 0 {
                Self::flush_run(Some(&mut **guard), &mut run);
                continue;
            }

            let page_address = self.region.page_address(page as u64);
            match run.as_mut() {
                Some(range) if range.end() == page_address => range.page_count += 1,
                _ => run = Some(PageRange::new(page_address, 1)),
            }
        }

        Self::flush_run(ladder.as_deref_mut(), &mut run);
    }

    /// Removes an owner from every page of an allocation result.
    pub fn decrement_references(&self, pages: &PageRangeList) {
        self.free_pages(pages);
    }

    fn flush_run(ladder: Option<&mut TierLadder>, run: &mut Option<PageRange>) {
        let Some(range) = run.take() else {
            return;
        };
        let Some(ladder) = ladder else {
            unreachable!("pages reached zero references without the allocator lock");
        };
        log::trace!("releasing {} pages at {}", range.page_count, range.address);
        ladder.release_run(range.address, range.page_count);
    }

    fn open_range(&self, range: PageRange) {
        let first = self.page_index(range.address);
        for page in first..first + range.page_count as usize {
            self.references.open(page);
        }
    }

    #[inline]
    fn page_index(&self, address: PhysicalAddress) -> usize {
        self.region.page_offset(address) as usize
    }

    fn log_exhausted(ladder: &TierLadder, page_count: u64, kind: &str) {
        debug!(
            "Out of memory for {kind} allocation of {page_count} pages ({} pages free)",
            ladder.free_page_count()
        );
    }
}

impl<B: BackingStore> core::fmt::Debug for RegionAllocator<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionAllocator")
            .field("region", &self.region)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}
