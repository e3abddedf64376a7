//! Per-page reference counters.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

/// One atomic counter per page of the region, all starting at zero.
///
/// Counts that stay above zero can be changed without the allocator lock.
/// The `0 → 1` transition happens only while a block is being handed out
/// and the `1 → 0` transition only under the allocator lock, since both have
/// to agree with the tier bitmaps.
pub(crate) struct ReferenceTable {
    counts: Box<[AtomicU32]>,
}

impl ReferenceTable {
    pub(crate) fn new(page_count: usize) -> Self {
        Self {
            counts: (0..page_count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }

    /// Current count of the page at `page`.
    #[inline]
    #[must_use]
    pub(crate) fn get(&self, page: usize) -> u32 {
        self.counts[page].load(Ordering::Acquire)
    }

    /// Gives a freshly allocated page its first reference.
    ///
    /// # Panics
    /// If the page already has an owner.
    pub(crate) fn open(&self, page: usize) {
        let previous = self.counts[page].swap(1, Ordering::AcqRel);
        assert_eq!(previous, 0, "page {page} handed out while still referenced");
    }

    /// Adds one reference to an already owned page.
    ///
    /// # Panics
    /// If the page is free or the count would overflow.
    pub(crate) fn increment(&self, page: usize) {
        let result = self.counts[page].fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            if c == 0 { None } else { c.checked_add(1) }
        });
        match result {
            Ok(_) => {}
            Err(0) => panic!("page {page} is not allocated"),
            Err(_) => panic!("reference count of page {page} overflows"),
        }
    }

    /// Drops one reference if that leaves at least one behind.
    ///
    /// Returns `false` without touching the counter when the caller holds the
    /// last reference; that case has to go through [`release`](Self::release).
    pub(crate) fn release_shared(&self, page: usize) -> bool {
        self.counts[page]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c > 1).then(|| c - 1)
            })
            .is_ok()
    }

    /// Drops one reference and returns the remaining count.
    ///
    /// # Panics
    /// If the page has no references left.
    pub(crate) fn release(&self, page: usize) -> u32 {
        match self.counts[page].fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            c.checked_sub(1)
        }) {
            Ok(previous) => previous - 1,
            Err(_) => panic!("page {page} released more often than referenced"),
        }
    }
}

impl core::fmt::Debug for ReferenceTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReferenceTable")
            .field("pages", &self.counts.len())
            .finish_non_exhaustive()
    }
}
