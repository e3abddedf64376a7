use crate::PhysicalAddress;

/// Host-side reservation of memory behind freshly allocated guest pages.
///
/// The allocator only tracks ownership of guest-physical pages. Once a
/// contiguous range has been handed out it calls [`commit`](Self::commit) so the
/// host can back it with real memory before the mapper exposes it to the guest.
///
/// Implementations are called while the allocator lock is **not** held and may
/// be invoked from several threads at once.
pub trait BackingStore {
    /// Reserve host memory for `len` bytes of guest memory at `address`.
    fn commit(&self, address: PhysicalAddress, len: u64);
}

/// A backing store that does nothing, for hosts that pre-commit the whole region.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoBackingStore;

impl BackingStore for NoBackingStore {
    #[inline]
    fn commit(&self, _address: PhysicalAddress, _len: u64) {}
}

impl<B: BackingStore + ?Sized> BackingStore for &B {
    #[inline]
    fn commit(&self, address: PhysicalAddress, len: u64) {
        (**self).commit(address, len);
    }
}
