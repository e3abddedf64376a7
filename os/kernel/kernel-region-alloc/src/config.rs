//! Allocator configuration.
//!
//! The tier ladder is plain data so that tests can run the allocator over
//! tiny regions with short ladders, while the kernel uses [`TierLadderConfig::DEFAULT`].

use crate::error::ConfigError;
use crate::region::PAGE_SHIFT;
use crate::PhysicalAddress;

/// Ordered list of block orders (log2 of the block size in bytes), smallest first.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TierLadderConfig {
    pub orders: &'static [u32],
}

impl TierLadderConfig {
    /// 4 KiB, 64 KiB, 2 MiB, 4 MiB, 32 MiB, 512 MiB and 1 GiB blocks.
    pub const DEFAULT: Self = Self::new(&[12, 16, 21, 22, 25, 29, 30]);

    #[must_use]
    pub const fn new(orders: &'static [u32]) -> Self {
        Self { orders }
    }

    /// Checks that the ladder starts at the page order and strictly grows.
    ///
    /// # Errors
    /// See [`ConfigError`] for the individual conditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(&first) = self.orders.first() else {
            return Err(ConfigError::EmptyLadder);
        };
        if first != PAGE_SHIFT {
            return Err(ConfigError::SmallestOrderNotPage(first));
        }
        for pair in self.orders.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ConfigError::UnsortedOrders(pair[1], pair[0]));
            }
        }
        if let Some(&last) = self.orders.last()
            && last >= u64::BITS - 1
        {
            return Err(ConfigError::OrderOutOfRange(last));
        }
        Ok(())
    }
}

impl Default for TierLadderConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Geometry of one managed region plus the ladder used to carve it up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionConfig {
    pub base: PhysicalAddress,
    pub size: u64,
    pub ladder: TierLadderConfig,
}

impl RegionConfig {
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u64) -> Self {
        Self {
            base,
            size,
            ladder: TierLadderConfig::DEFAULT,
        }
    }

    #[must_use]
    pub const fn with_ladder(mut self, ladder: TierLadderConfig) -> Self {
        self.ladder = ladder;
        self
    }

    /// # Errors
    /// See [`ConfigError`] for the individual conditions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base.is_page_aligned() {
            return Err(ConfigError::UnalignedBase(self.base));
        }
        if self.size == 0 {
            return Err(ConfigError::EmptyRegion);
        }
        if !PhysicalAddress::new(self.size).is_page_aligned() {
            return Err(ConfigError::UnalignedSize(self.size));
        }
        if self.base.checked_add(self.size).is_none() {
            return Err(ConfigError::RegionOverflow(self.base, self.size));
        }
        self.ladder.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_is_valid() {
        assert_eq!(TierLadderConfig::DEFAULT.validate(), Ok(()));
        assert_eq!(TierLadderConfig::default(), TierLadderConfig::DEFAULT);
    }

    #[test]
    fn ladder_rejects_bad_orders() {
        assert_eq!(
            TierLadderConfig::new(&[]).validate(),
            Err(ConfigError::EmptyLadder)
        );
        assert_eq!(
            TierLadderConfig::new(&[13, 16]).validate(),
            Err(ConfigError::SmallestOrderNotPage(13))
        );
        assert_eq!(
            TierLadderConfig::new(&[12, 16, 16]).validate(),
            Err(ConfigError::UnsortedOrders(16, 16))
        );
        assert_eq!(
            TierLadderConfig::new(&[12, 63]).validate(),
            Err(ConfigError::OrderOutOfRange(63))
        );
    }

    #[test]
    fn region_rejects_bad_geometry() {
        let base = PhysicalAddress::new(0x1000_0000);
        assert_eq!(
            RegionConfig::new(base + 1, 0x1000).validate(),
            Err(ConfigError::UnalignedBase(base + 1))
        );
        assert_eq!(
            RegionConfig::new(base, 0).validate(),
            Err(ConfigError::EmptyRegion)
        );
        assert_eq!(
            RegionConfig::new(base, 0x1800).validate(),
            Err(ConfigError::UnalignedSize(0x1800))
        );
        let top = PhysicalAddress::new(u64::MAX & !0xFFF);
        assert_eq!(
            RegionConfig::new(top, 0x2000).validate(),
            Err(ConfigError::RegionOverflow(top, 0x2000))
        );
        assert_eq!(RegionConfig::new(base, 0x4000).validate(), Ok(()));
    }
}
