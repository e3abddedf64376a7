use kernel_region_alloc::{
    AllocError, NoBackingStore, PAGE_SIZE, PageRange, PageRangeList, PhysicalAddress,
    RegionAllocator, RegionConfig, SearchDirection, TierLadderConfig,
};
use std::collections::HashSet;

const BASE: PhysicalAddress = PhysicalAddress::new(0x8000_0000);

/// 4 KiB, 16 KiB and 64 KiB blocks.
const SMALL: TierLadderConfig = TierLadderConfig::new(&[12, 14, 16]);

/// 4 KiB, 64 KiB and 256 KiB blocks.
const WIDE: TierLadderConfig = TierLadderConfig::new(&[12, 16, 18]);

fn heap(pages: u64, ladder: TierLadderConfig) -> RegionAllocator {
    let config = RegionConfig::new(BASE, pages * PAGE_SIZE).with_ladder(ladder);
    RegionAllocator::with_config(config, NoBackingStore).unwrap()
}

/// Tiny deterministic generator so the sequences below are reproducible.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn pages_of(list: &PageRangeList) -> impl Iterator<Item = PhysicalAddress> + '_ {
    list.iter()
        .flat_map(|r| (0..r.page_count).map(move |i| r.address.add_pages(i)))
}

#[test]
fn concrete_sixteen_page_scenario() {
    let heap = heap(16, SMALL);

    let pages = heap
        .allocate_fragmented(3, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(pages.total_pages(), 3);
    assert_eq!(heap.free_page_count(), 13);

    // Drop the second page of the allocation.
    let second = pages_of(&pages).nth(1).unwrap();
    assert_eq!(heap.reference_count(second), 1);
    heap.free(second, 1);
    assert_eq!(heap.free_page_count(), 14);

    assert_eq!(
        heap.allocate_contiguous(16, SearchDirection::Ascending),
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(heap.free_page_count(), 14);
}

#[test]
fn conservation_over_mixed_workload() {
    let heap = heap(256, WIDE);
    let total = heap.total_page_count();
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    let mut live: Vec<PageRange> = Vec::new();

    for _ in 0..2_000 {
        let direction = if rng.below(2) == 0 {
            SearchDirection::Ascending
        } else {
            SearchDirection::Descending
        };

        match rng.below(4) {
            0 | 1 => {
                let count = 1 + rng.below(24);
                if let Ok(list) = heap.allocate_fragmented(count, direction) {
                    assert_eq!(list.total_pages(), count);
                    live.extend(list);
                }
            }
            2 => {
                let count = 1 + rng.below(20);
                if let Ok(address) = heap.allocate_contiguous(count, direction) {
                    live.push(PageRange::new(address, count));
                }
            }
            _ if !live.is_empty() => {
                let range = live.swap_remove(rng.below(live.len() as u64) as usize);
                heap.free(range.address, range.page_count);
            }
            _ => {}
        }

        let allocated: u64 = live.iter().map(|r| r.page_count).sum();
        assert_eq!(heap.free_page_count() + allocated, total);
    }

    for range in live.drain(..) {
        heap.free(range.address, range.page_count);
    }
    assert_eq!(heap.free_page_count(), total);
}

#[test]
fn live_allocations_never_overlap() {
    let heap = heap(128, SMALL);
    let mut rng = XorShift(42);
    let mut owned: HashSet<PhysicalAddress> = HashSet::new();
    let mut live: Vec<PageRangeList> = Vec::new();

    for _ in 0..500 {
        if rng.below(3) == 0 && !live.is_empty() {
            let list = live.swap_remove(rng.below(live.len() as u64) as usize);
            for page in pages_of(&list) {
                assert!(owned.remove(&page));
            }
            heap.free_pages(&list);
            continue;
        }

        let count = 1 + rng.below(12);
        if let Ok(list) = heap.allocate_fragmented(count, SearchDirection::Ascending) {
            for page in pages_of(&list) {
                assert!(heap.region().contains(page));
                assert!(owned.insert(page), "page {page} granted twice");
            }
            live.push(list);
        }
    }
}

#[test]
fn failed_fragmented_allocation_changes_nothing() {
    let heap = heap(64, SMALL);
    let _held = heap
        .allocate_fragmented(10, SearchDirection::Ascending)
        .unwrap();
    let before = heap.free_page_count();

    assert_eq!(
        heap.allocate_fragmented(before + 1, SearchDirection::Descending),
        Err(AllocError::OutOfMemory)
    );
    assert_eq!(heap.free_page_count(), before);

    // Everything that is left is still obtainable.
    let rest = heap
        .allocate_fragmented(before, SearchDirection::Descending)
        .unwrap();
    assert_eq!(rest.total_pages(), before);
    assert_eq!(heap.free_page_count(), 0);
}

#[test]
fn top_tier_block_round_trip() {
    let heap = heap(64, WIDE);
    let top_pages = 64;

    let first = heap
        .allocate_fragmented(top_pages, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(first.len(), 1);
    let address = first.as_slice()[0].address;
    heap.free_pages(&first);

    let again = heap
        .allocate_contiguous(top_pages, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(again, address);
    assert_eq!(heap.free_page_count(), 0);
}

#[test]
fn churn_does_not_fragment_top_tier() {
    let heap = heap(128, WIDE);
    let mut lists = Vec::new();
    for _ in 0..40 {
        lists.push(
            heap.allocate_fragmented(3, SearchDirection::Ascending)
                .unwrap(),
        );
    }
    for list in lists.iter().rev() {
        heap.free_pages(list);
    }

    // Both 256 KiB blocks have to be whole again.
    let a = heap
        .allocate_contiguous(64, SearchDirection::Ascending)
        .unwrap();
    let b = heap
        .allocate_contiguous(64, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(a, BASE);
    assert_eq!(b, BASE.add_pages(64));
}

#[test]
fn shared_pages_survive_first_release() {
    let heap = heap(64, SMALL);
    let address = heap
        .allocate_contiguous(8, SearchDirection::Ascending)
        .unwrap();
    let free_before = heap.free_page_count();

    heap.increment_reference(address, 8);
    heap.decrement_reference(address, 8);
    assert_eq!(heap.free_page_count(), free_before);
    assert_eq!(heap.reference_count(address), 1);

    heap.decrement_reference(address, 8);
    assert_eq!(heap.free_page_count(), free_before + 8);
    assert_eq!(heap.reference_count(address), 0);
}

#[test]
fn shared_fragmented_lists() {
    let heap = heap(64, SMALL);
    let list = heap
        .allocate_fragmented(21, SearchDirection::Descending)
        .unwrap();
    heap.increment_references(&list);
    heap.decrement_references(&list);
    assert_eq!(heap.used_page_count(), 21);
    heap.decrement_references(&list);
    assert_eq!(heap.used_page_count(), 0);
}

fn exhaust(heap: &RegionAllocator, direction: SearchDirection) -> Vec<PhysicalAddress> {
    let mut taken = Vec::new();
    while let Ok(list) = heap.allocate_fragmented(1, direction) {
        taken.extend(pages_of(&list));
    }
    taken
}

#[test]
fn each_direction_covers_the_region_once() {
    let all: Vec<PhysicalAddress> = (0..128).map(|i| BASE.add_pages(i)).collect();

    let ascending = exhaust(&heap(128, SMALL), SearchDirection::Ascending);
    assert_eq!(ascending, all);

    let descending = exhaust(&heap(128, SMALL), SearchDirection::Descending);
    let mut reversed = all.clone();
    reversed.reverse();
    assert_eq!(descending, reversed);
}

#[test]
fn interleaved_directions_stay_disjoint() {
    let heap = heap(96, WIDE);
    let mut seen = HashSet::new();
    let mut direction = SearchDirection::Ascending;

    while let Ok(list) = heap.allocate_fragmented(1, direction) {
        for page in pages_of(&list) {
            assert!(seen.insert(page));
        }
        direction = match direction {
            SearchDirection::Ascending => SearchDirection::Descending,
            SearchDirection::Descending => SearchDirection::Ascending,
        };
    }

    assert_eq!(seen.len(), 96);
}

#[test]
fn unaligned_region_is_fully_usable() {
    // 37 pages starting 5 pages past a 64 KiB boundary.
    let config = RegionConfig::new(BASE.add_pages(5), 37 * PAGE_SIZE).with_ladder(SMALL);
    let heap = RegionAllocator::with_config(config, NoBackingStore).unwrap();
    assert_eq!(heap.free_page_count(), 37);

    let list = heap
        .allocate_fragmented(37, SearchDirection::Ascending)
        .unwrap();
    assert!(pages_of(&list).all(|p| heap.region().contains(p)));
    heap.free_pages(&list);
    assert_eq!(heap.free_page_count(), 37);

    let block = heap
        .allocate_contiguous(16, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(block, BASE.add_pages(16));
}

#[test]
fn page_offsets_from_both_ends() {
    let heap = heap(16, SMALL);
    assert_eq!(heap.page_offset(BASE), 0);
    assert_eq!(heap.page_offset(BASE.add_pages(15)), 15);
    assert_eq!(heap.page_offset_from_end(BASE), 16);
    assert_eq!(heap.page_offset_from_end(BASE.add_pages(15)), 1);
}

#[test]
fn aligned_contiguous_allocation() {
    let heap = heap(64, SMALL);
    let _ = heap.allocate_contiguous(1, SearchDirection::Ascending);
    let address = heap
        .allocate_contiguous_aligned(3, 4, SearchDirection::Descending)
        .unwrap();
    assert!(address.is_aligned(4 * PAGE_SIZE));
    assert_eq!(heap.free_page_count(), 60);
}

#[test]
fn default_ladder_handles_large_regions() {
    let heap = RegionAllocator::new(PhysicalAddress::new(0x1_0000_0000), 3 << 30).unwrap();
    assert_eq!(heap.tier_count(), 7);
    assert_eq!(heap.free_page_count(), (3 << 30) / PAGE_SIZE);

    let huge = heap
        .allocate_contiguous((1 << 30) / PAGE_SIZE, SearchDirection::Descending)
        .unwrap();
    assert_eq!(huge.as_u64(), 0x1_8000_0000);

    let list = heap
        .allocate_fragmented(1000, SearchDirection::Ascending)
        .unwrap();
    assert_eq!(list.total_pages(), 1000);

    heap.free_pages(&list);
    heap.free(huge, (1 << 30) / PAGE_SIZE);
    assert_eq!(heap.used_page_count(), 0);
    heap.with_tiers(|tiers| {
        let top = tiers.last().unwrap();
        assert_eq!(top.free_count(), 3);
        assert!(tiers[..tiers.len() - 1].iter().all(|t| t.free_count() == 0));
    });
}
