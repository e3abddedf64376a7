use crate::PhysicalAddress;

/// log2 of the guest page size.
pub const PAGE_SHIFT: u32 = 12;

/// Guest page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// The immutable address range managed by one allocator.
///
/// ### Invariants
/// - `base` and `end` are page aligned and `base < end`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    base: PhysicalAddress,
    size: u64,
    end: PhysicalAddress,
}

impl Region {
    /// The caller validates the geometry (see [`RegionConfig::validate`](crate::RegionConfig::validate)).
    pub(crate) fn new(base: PhysicalAddress, size: u64) -> Self {
        debug_assert!(base.is_page_aligned() && size > 0);
        Self {
            base,
            size,
            end: base + size,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// First address past the region.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.size >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, address: PhysicalAddress) -> bool {
        address >= self.base && address < self.end
    }

    /// Whether `[address, address + page_count pages)` lies inside the region.
    #[must_use]
    pub fn contains_pages(&self, address: PhysicalAddress, page_count: u64) -> bool {
        if !self.contains(address) {
            return false;
        }
        (self.end - address) >> PAGE_SHIFT >= page_count
    }

    /// Index of the page containing `address`, counted from the base.
    ///
    /// # Panics
    /// If `address` is outside the region.
    #[must_use]
    pub fn page_offset(&self, address: PhysicalAddress) -> u64 {
        assert!(self.contains(address), "{address} is outside the region");
        (address - self.base) >> PAGE_SHIFT
    }

    /// Number of pages from the page containing `address` up to the region end.
    ///
    /// # Panics
    /// If `address` is outside the region.
    #[must_use]
    pub fn page_offset_from_end(&self, address: PhysicalAddress) -> u64 {
        assert!(self.contains(address), "{address} is outside the region");
        (self.end - address.align_down(PAGE_SIZE)) >> PAGE_SHIFT
    }

    /// Address of the page with the given index.
    #[must_use]
    pub fn page_address(&self, page_index: u64) -> PhysicalAddress {
        debug_assert!(page_index < self.page_count());
        self.base.add_pages(page_index)
    }

    /// Asserts that a caller-provided range is page aligned and inside the region.
    pub(crate) fn check_range(&self, address: PhysicalAddress, page_count: u64) {
        assert!(address.is_page_aligned(), "{address} is not page aligned");
        assert!(
            self.contains_pages(address, page_count),
            "{page_count} pages at {address} exceed the region {}..{}",
            self.base,
            self.end
        );
    }
}
