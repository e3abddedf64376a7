use crate::PhysicalAddress;

/// The only recoverable failure of the allocator.
///
/// Every other misuse (foreign addresses, double frees, reference count
/// underflow) is a caller bug and panics.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("out of memory")]
    OutOfMemory,
}

/// Reasons a [`RegionConfig`](crate::RegionConfig) cannot be turned into an allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("region base {0} is not page aligned")]
    UnalignedBase(PhysicalAddress),
    #[error("region size {0:#x} is not a multiple of the page size")]
    UnalignedSize(u64),
    #[error("region is empty")]
    EmptyRegion,
    #[error("region at {0} with size {1:#x} overflows the address space")]
    RegionOverflow(PhysicalAddress, u64),
    #[error("tier ladder is empty")]
    EmptyLadder,
    #[error("smallest tier order {0} does not match the page order")]
    SmallestOrderNotPage(u32),
    #[error("tier orders must be strictly increasing, got {0} after {1}")]
    UnsortedOrders(u32, u32),
    #[error("tier order {0} is out of range")]
    OrderOutOfRange(u32),
}
