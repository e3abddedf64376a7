use crate::PhysicalAddress;
use crate::region::PAGE_SHIFT;
use alloc::vec::Vec;
use core::slice;

/// A run of `page_count` pages starting at `address`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageRange {
    pub address: PhysicalAddress,
    pub page_count: u64,
}

impl PageRange {
    #[inline]
    #[must_use]
    pub const fn new(address: PhysicalAddress, page_count: u64) -> Self {
        Self {
            address,
            page_count,
        }
    }

    /// First address past the range.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.address.add_pages(self.page_count)
    }

    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> u64 {
        self.page_count << PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, address: PhysicalAddress) -> bool {
        address >= self.address && address < self.end()
    }

    /// Whether the two ranges share at least one page.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

/// The pages granted by one allocation request, in grant order.
///
/// Appending a range that begins where the previous one ends extends that
/// entry instead of adding a new one.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PageRangeList {
    ranges: Vec<PageRange>,
}

impl PageRangeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn push(&mut self, address: PhysicalAddress, page_count: u64) {
        debug_assert!(page_count > 0);
        if let Some(last) = self.ranges.last_mut()
            && last.end() == address
        {
            last.page_count += page_count;
            return;
        }
        self.ranges.push(PageRange::new(address, page_count));
    }

    /// Number of entries after merging.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Sum of the page counts of all entries.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.ranges.iter().map(|r| r.page_count).sum()
    }

    #[must_use]
    pub fn contains(&self, address: PhysicalAddress) -> bool {
        self.ranges.iter().any(|r| r.contains(address))
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[PageRange] {
        &self.ranges
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, PageRange> {
        self.ranges.iter()
    }
}

impl<'a> IntoIterator for &'a PageRangeList {
    type Item = &'a PageRange;
    type IntoIter = slice::Iter<'a, PageRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl IntoIterator for PageRangeList {
    type Item = PageRange;
    type IntoIter = alloc::vec::IntoIter<PageRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.into_iter()
    }
}
