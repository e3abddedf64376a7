//! # Guest Physical Region Allocator
//!
//! Page allocator used by the emulated guest kernel to hand out its fixed pool
//! of "physical" memory to guest processes. The pool is a single, pre-sized
//! address region carved into fixed-size pages; this crate decides which pages
//! are owned, by how many owners, and keeps the free space in large blocks for
//! as long as possible.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 RegionAllocator                     │
//! │    • fragmented / contiguous allocation             │
//! │    • batched release of unreferenced pages          │
//! │    • backing store commit hook                      │
//! └──────────────┬─────────────────────────┬────────────┘
//!                │ (locked)                │ (atomic)
//! ┌──────────────▼──────────────┐ ┌────────▼────────────┐
//! │         Tier ladder         │ │   ReferenceTable    │
//! │  4K · 64K · 2M · … · 1G     │ │  one counter/page   │
//! │  split on take,             │ │                     │
//! │  coalesce on release        │ │                     │
//! └──────────────┬──────────────┘ └─────────────────────┘
//!                │
//! ┌──────────────▼──────────────────────────────────────┐
//! │        Hierarchical bitmap (one per tier)           │
//! │    • one leaf bit per block, 64-ary summaries       │
//! │    • lowest/highest free block in O(depth)          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ### Tiers
//!
//! Each [`Tier`] tracks the free blocks of one size ("order") over the whole
//! region. A free page is owned by exactly one tier at a time: the largest one
//! whose block around the page is entirely free. Allocations take whole
//! blocks and split larger ones when needed, releasing the remainder right
//! away; frees cut the released pages into the largest aligned blocks and
//! promote complete sibling groups into the next tier.
//!
//! ### Reference counting
//!
//! Every page has a counter. Allocation gives each page its first reference,
//! [`RegionAllocator::increment_reference`] adds owners for shared or
//! copy-on-write mappings, and the page goes back to the tiers once its last
//! owner calls [`RegionAllocator::free`].
//!
//! ## Usage
//!
//! ```rust
//! use kernel_region_alloc::{
//!     PhysicalAddress, RegionAllocator, RegionConfig, SearchDirection, TierLadderConfig,
//!     NoBackingStore,
//! };
//!
//! // A 1 MiB region using 4 KiB, 16 KiB and 64 KiB blocks.
//! let config = RegionConfig::new(PhysicalAddress::new(0x4000_0000), 1 << 20)
//!     .with_ladder(TierLadderConfig::new(&[12, 14, 16]));
//! let heap = RegionAllocator::with_config(config, NoBackingStore)?;
//!
//! let stack = heap.allocate_contiguous(4, SearchDirection::Descending)?;
//! heap.increment_reference(stack, 4); // shared with a second process
//! heap.free(stack, 4);
//! assert_eq!(heap.used_page_count(), 4);
//! heap.free(stack, 4);
//! assert_eq!(heap.used_page_count(), 0);
//! # Ok::<(), Box<dyn core::error::Error>>(())
//! ```
//!
//! ## Concurrency
//!
//! The allocator is `Sync`. Tier state is guarded by one spin lock held for
//! the duration of each allocation and each release to the tiers. Reference
//! count changes that do not cross zero never take it.
//!
//! ## Failure Model
//!
//! Running out of memory is the only recoverable error
//! ([`AllocError::OutOfMemory`]) and leaves the allocator untouched. Freeing
//! foreign or unallocated pages is a bug in the caller and panics.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::cast_possible_truncation)]

extern crate alloc;

mod address;
mod allocator;
mod backing;
mod bitmap;
mod config;
mod error;
mod ladder;
mod page_range;
mod refcount;
mod region;
mod tier;

pub use address::PhysicalAddress;
pub use allocator::RegionAllocator;
pub use backing::{BackingStore, NoBackingStore};
pub use bitmap::SearchDirection;
pub use config::{RegionConfig, TierLadderConfig};
pub use error::{AllocError, ConfigError};
pub use page_range::{PageRange, PageRangeList};
pub use region::{PAGE_SHIFT, PAGE_SIZE, Region};
pub use tier::Tier;
