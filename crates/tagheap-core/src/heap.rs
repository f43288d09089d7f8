//! Heap state: allocation and coalescing over provider-backed chunks.
//!
//! `Heap` owns the page provider, the free-block registry, and the table of
//! live chunks. `allocate` is a first-fit scan over the registry with
//! splitting; `release` flips the tags, merges free neighbors in constant
//! time through their boundary tags, and hands a chunk back to the provider
//! the moment its interior is one free block.
//!
//! Every operation appends a structured [`HeapRecord`]; hosts and harnesses
//! drain them instead of wiring up a logger.

use std::collections::BTreeMap;

use thiserror::Error;

use tagheap_pages::{MapError, PageProvider};

use crate::chunk::{self, CHUNK_OVERHEAD, GrowthPolicy};
use crate::free_list::{FreeList, NIL};
use crate::tag::{self, ALIGNMENT, MIN_BLOCK, TAG_OVERHEAD, WORD};

/// Reasons an allocation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The provider could not supply a chunk large enough for the request.
    #[error("page provider cannot supply a chunk: {0}")]
    OutOfPages(#[from] MapError),
    /// Padding the request overflows the address range; no chunk can hold it.
    #[error("request of {size} bytes can never fit in a chunk")]
    RequestTooLarge { size: usize },
}

/// Severity of a heap lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapRecord {
    /// Monotonic event id.
    pub seq: u64,
    /// Severity level.
    pub level: RecordLevel,
    /// API operation (`new`, `allocate`, `release`).
    pub op: &'static str,
    /// Event kind (`grow`, `alloc`, `free`, `chunk_release`, `reject`).
    pub event: &'static str,
    /// Payload address involved, if any.
    pub addr: Option<usize>,
    /// Size involved, if any.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details.
    pub details: String,
    /// Snapshot of the stats after the event.
    pub stats: HeapStats,
}

/// Running totals and counters.
///
/// Byte figures count whole blocks (tags included), so at any quiescent
/// point `live_bytes + free_bytes + chunks * CHUNK_OVERHEAD` equals the
/// bytes currently mapped for the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Allocated blocks not yet released.
    pub live_blocks: usize,
    /// Total size of live blocks.
    pub live_bytes: usize,
    /// Registered free blocks.
    pub free_blocks: usize,
    /// Total size of registered free blocks.
    pub free_bytes: usize,
    /// Chunks currently held from the provider.
    pub chunks: usize,
    /// Successful `allocate` calls.
    pub allocations: u64,
    /// Successful `release` calls.
    pub releases: u64,
    /// Blocks split during placement.
    pub splits: u64,
    /// Pairwise merges performed while coalescing.
    pub coalesces: u64,
    /// Chunks acquired from the provider.
    pub grows: u64,
    /// Chunks handed back to the provider.
    pub chunk_releases: u64,
    /// `allocate` calls that failed, on an oversized request or provider
    /// exhaustion.
    pub failed_allocations: u64,
    /// `release` calls ignored by the liveness check.
    pub rejected_releases: u64,
}

/// A boundary-tag heap over a page provider.
pub struct Heap<P> {
    pub(crate) pages: P,
    pub(crate) registry: FreeList,
    policy: GrowthPolicy,
    /// Live chunks, base -> length. Mirrors the provider's view; the heap
    /// checker walks it chunk by chunk.
    pub(crate) chunks: BTreeMap<usize, usize>,
    stats: HeapStats,
    records: Vec<HeapRecord>,
    next_seq: u64,
}

impl<P: PageProvider> Heap<P> {
    /// Creates a heap over `pages` and performs the initial chunk
    /// acquisition. A `Heap` that exists is ready for `allocate`.
    pub fn new(pages: P) -> Result<Self, AllocError> {
        Self::with_policy(pages, GrowthPolicy::default())
    }

    /// Creates a heap with an explicit growth policy.
    pub fn with_policy(pages: P, policy: GrowthPolicy) -> Result<Self, AllocError> {
        let mut heap = Self {
            pages,
            registry: FreeList::new(),
            policy,
            chunks: BTreeMap::new(),
            stats: HeapStats::default(),
            records: Vec::new(),
            next_seq: 1,
        };
        heap.grow(0, "new")?;
        Ok(heap)
    }

    /// Allocates `size` bytes and returns a 16-aligned payload address.
    ///
    /// A zero `size` is treated as a minimum-size request. Fails when the
    /// padded request cannot be represented at all, or when the provider
    /// cannot supply a chunk for it.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        let Some(need) = size
            .max(1)
            .checked_add(TAG_OVERHEAD)
            .and_then(tag::checked_align_up)
        else {
            return Err(self.reject_oversized("allocate", size, "padded size overflows"));
        };

        let mut cursor = self.registry.head();
        while cursor != NIL {
            let block_size = tag::size_of(self.pages.load(tag::header_of(cursor)));
            if block_size >= need {
                self.registry.remove(&mut self.pages, cursor);
                let addr = self.place(cursor, block_size, need);
                self.finish_allocate(addr, size, "fit");
                return Ok(addr);
            }
            cursor = FreeList::next_of(&self.pages, cursor);
        }

        let payload = self.grow(need, "allocate")?;
        let block_size = tag::size_of(self.pages.load(tag::header_of(payload)));
        self.registry.remove(&mut self.pages, payload);
        let addr = self.place(payload, block_size, need);
        self.finish_allocate(addr, size, "grown");
        Ok(addr)
    }

    /// Releases the allocation at `addr`.
    ///
    /// `addr` must be a payload address returned by
    /// [`allocate`](Self::allocate) and not yet released. Calls that fail
    /// the boundary liveness check are ignored and recorded at warn level;
    /// correct callers never trigger it.
    pub fn release(&mut self, addr: usize) {
        let Some(size) = self.live_block_size(addr) else {
            self.stats.rejected_releases += 1;
            self.record(
                RecordLevel::Warn,
                "release",
                "reject",
                Some(addr),
                None,
                "invalid_address",
                "liveness check failed; call ignored",
            );
            return;
        };

        self.pages.store(tag::header_of(addr), tag::pack(size, false));
        self.pages
            .store(tag::footer_of(addr, size), tag::pack(size, false));
        self.stats.releases += 1;
        self.stats.live_blocks -= 1;
        self.stats.live_bytes -= size;
        self.stats.free_blocks += 1;
        self.stats.free_bytes += size;

        let merged = self.coalesce(addr);
        let merged_size = tag::size_of(self.pages.load(tag::header_of(merged)));
        self.record(
            RecordLevel::Trace,
            "release",
            "free",
            Some(addr),
            Some(size),
            "success",
            format!("merged={merged:#x} merged_size={merged_size}"),
        );
        self.release_chunk_if_idle(merged, merged_size);
    }

    /// Current stats snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Lifecycle records collected so far.
    #[must_use]
    pub fn records(&self) -> &[HeapRecord] {
        &self.records
    }

    /// Removes and returns all collected lifecycle records.
    pub fn drain_records(&mut self) -> Vec<HeapRecord> {
        std::mem::take(&mut self.records)
    }

    /// The growth policy in effect.
    #[must_use]
    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// Number of registered free blocks.
    #[must_use]
    pub fn free_list_len(&self) -> usize {
        self.registry.len()
    }

    /// The underlying provider.
    #[must_use]
    pub fn pages(&self) -> &P {
        &self.pages
    }

    /// Mutable access to the provider, for payload reads and writes.
    pub fn pages_mut(&mut self) -> &mut P {
        &mut self.pages
    }

    /// Consumes the heap and returns the provider.
    #[must_use]
    pub fn into_pages(self) -> P {
        self.pages
    }

    // ------------------------------------------------------------------
    // Internal machinery
    // ------------------------------------------------------------------

    /// Maps a fresh chunk big enough for a block of `need` bytes and
    /// registers its spanning free block.
    fn grow(&mut self, need: usize, op: &'static str) -> Result<usize, AllocError> {
        let Some(len) = self.policy.chunk_len(need, self.pages.page_size()) else {
            return Err(self.reject_oversized(op, need, "no chunk length can hold the block"));
        };
        let base = match self.pages.map(len) {
            Ok(base) => base,
            Err(err) => {
                self.stats.failed_allocations += 1;
                self.record(
                    RecordLevel::Warn,
                    op,
                    "grow",
                    None,
                    Some(len),
                    "out_of_pages",
                    err.to_string(),
                );
                return Err(AllocError::OutOfPages(err));
            }
        };

        let payload = chunk::install(&mut self.pages, base, len);
        let interior = len - CHUNK_OVERHEAD;
        self.registry.insert(&mut self.pages, payload);
        self.chunks.insert(base, len);
        self.stats.grows += 1;
        self.stats.chunks += 1;
        self.stats.free_blocks += 1;
        self.stats.free_bytes += interior;
        self.record(
            RecordLevel::Debug,
            op,
            "grow",
            Some(payload),
            Some(len),
            "mapped",
            format!("base={base:#x} interior={interior}"),
        );
        Ok(payload)
    }

    /// Counts and records a request no chunk could ever hold.
    fn reject_oversized(&mut self, op: &'static str, size: usize, why: &'static str) -> AllocError {
        self.stats.failed_allocations += 1;
        self.record(
            RecordLevel::Warn,
            op,
            "reject",
            None,
            Some(size),
            "request_too_large",
            why,
        );
        AllocError::RequestTooLarge { size }
    }

    /// Marks a block (already out of the registry) allocated, splitting off
    /// the tail when the leftover can stand as a block of its own.
    fn place(&mut self, payload: usize, block_size: usize, need: usize) -> usize {
        self.stats.free_blocks -= 1;
        self.stats.free_bytes -= block_size;

        let leftover = block_size - need;
        if leftover >= MIN_BLOCK {
            self.pages.store(tag::header_of(payload), tag::pack(need, true));
            self.pages
                .store(tag::footer_of(payload, need), tag::pack(need, true));
            let rest = tag::next_payload(payload, need);
            self.pages.store(tag::header_of(rest), tag::pack(leftover, false));
            self.pages
                .store(tag::footer_of(rest, leftover), tag::pack(leftover, false));
            self.registry.insert(&mut self.pages, rest);
            self.stats.splits += 1;
            self.stats.free_blocks += 1;
            self.stats.free_bytes += leftover;
            self.stats.live_bytes += need;
        } else {
            self.pages
                .store(tag::header_of(payload), tag::pack(block_size, true));
            self.pages
                .store(tag::footer_of(payload, block_size), tag::pack(block_size, true));
            self.stats.live_bytes += block_size;
        }
        self.stats.live_blocks += 1;
        payload
    }

    fn finish_allocate(&mut self, addr: usize, requested: usize, path: &'static str) {
        self.stats.allocations += 1;
        let granted = tag::size_of(self.pages.load(tag::header_of(addr)));
        self.record(
            RecordLevel::Trace,
            "allocate",
            "alloc",
            Some(addr),
            Some(requested),
            "success",
            format!("path={path} granted={granted}"),
        );
    }

    /// Merges the freed block at `payload` with whichever neighbors are
    /// free. Returns the payload of the merged block, registered exactly
    /// once. The predecessor keeps its registry position when absorbing.
    fn coalesce(&mut self, payload: usize) -> usize {
        let size = tag::size_of(self.pages.load(tag::header_of(payload)));
        let prev_footer = self.pages.load(tag::prev_footer_of(payload));
        let next = tag::next_payload(payload, size);
        let next_header = self.pages.load(tag::header_of(next));

        match (tag::is_allocated(prev_footer), tag::is_allocated(next_header)) {
            (true, true) => {
                self.registry.insert(&mut self.pages, payload);
                payload
            }
            (true, false) => {
                let merged = size + tag::size_of(next_header);
                self.registry.remove(&mut self.pages, next);
                self.pages.store(tag::header_of(payload), tag::pack(merged, false));
                self.pages
                    .store(tag::footer_of(payload, merged), tag::pack(merged, false));
                self.registry.insert(&mut self.pages, payload);
                self.stats.coalesces += 1;
                self.stats.free_blocks -= 1;
                payload
            }
            (false, true) => {
                let prev_size = tag::size_of(prev_footer);
                let prev = tag::prev_payload(payload, prev_size);
                let merged = prev_size + size;
                self.pages.store(tag::header_of(prev), tag::pack(merged, false));
                self.pages
                    .store(tag::footer_of(prev, merged), tag::pack(merged, false));
                self.stats.coalesces += 1;
                self.stats.free_blocks -= 1;
                prev
            }
            (false, false) => {
                let prev_size = tag::size_of(prev_footer);
                let prev = tag::prev_payload(payload, prev_size);
                let merged = prev_size + size + tag::size_of(next_header);
                self.registry.remove(&mut self.pages, next);
                self.pages.store(tag::header_of(prev), tag::pack(merged, false));
                self.pages
                    .store(tag::footer_of(prev, merged), tag::pack(merged, false));
                self.stats.coalesces += 2;
                self.stats.free_blocks -= 2;
                prev
            }
        }
    }

    /// Hands the chunk back to the provider when `payload` spans it, that
    /// is, when its neighbors are the prologue and epilogue sentinels.
    fn release_chunk_if_idle(&mut self, payload: usize, size: usize) {
        let prev_footer = self.pages.load(tag::prev_footer_of(payload));
        let next_header = self
            .pages
            .load(tag::header_of(tag::next_payload(payload, size)));
        if !chunk::is_prologue(prev_footer) || !chunk::is_epilogue(next_header) {
            return;
        }

        let (base, len) = chunk::span_of_full_block(payload, size);
        // The block's link words live inside the span; splice before unmap.
        self.registry.remove(&mut self.pages, payload);
        match self.pages.unmap(base, len) {
            Ok(()) => {
                self.chunks.remove(&base);
                self.stats.chunks -= 1;
                self.stats.chunk_releases += 1;
                self.stats.free_blocks -= 1;
                self.stats.free_bytes -= size;
                self.record(
                    RecordLevel::Debug,
                    "release",
                    "chunk_release",
                    Some(payload),
                    Some(len),
                    "unmapped",
                    format!("base={base:#x}"),
                );
            }
            Err(err) => {
                // Provider and heap disagree about the span. Keep the block
                // usable and report instead of losing it.
                self.registry.insert(&mut self.pages, payload);
                self.record(
                    RecordLevel::Error,
                    "release",
                    "chunk_release",
                    Some(payload),
                    Some(len),
                    "unmap_rejected",
                    err.to_string(),
                );
            }
        }
    }

    /// Size of the live block at `addr`, or `None` if `addr` does not pass
    /// the boundary liveness check: 16-aligned, header mapped, tag marked
    /// allocated with a plausible size, footer in agreement.
    fn live_block_size(&self, addr: usize) -> Option<usize> {
        if addr == 0 || addr % ALIGNMENT != 0 {
            return None;
        }
        if !self.pages.is_mapped(tag::header_of(addr), WORD) {
            return None;
        }
        let header = self.pages.load(tag::header_of(addr));
        let size = tag::size_of(header);
        if !tag::is_allocated(header) || size < MIN_BLOCK || size % ALIGNMENT != 0 {
            return None;
        }
        if !self.pages.is_mapped(tag::header_of(addr), size) {
            return None;
        }
        let footer = self.pages.load(tag::footer_of(addr, size));
        if footer != header {
            return None;
        }
        Some(size)
    }

    fn record(
        &mut self,
        level: RecordLevel,
        op: &'static str,
        event: &'static str,
        addr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.records.push(HeapRecord {
            seq,
            level,
            op,
            event,
            addr,
            size,
            outcome,
            details: details.into(),
            stats: self.stats,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DEFAULT_MIN_CHUNK_BYTES;
    use tagheap_pages::{PAGE_SIZE, PageEvent, PagePool};

    const INITIAL_INTERIOR: usize = DEFAULT_MIN_CHUNK_BYTES - CHUNK_OVERHEAD;

    fn heap_with_pages(pages: usize) -> Heap<PagePool> {
        Heap::new(PagePool::new(pages * PAGE_SIZE)).unwrap()
    }

    #[test]
    fn test_new_performs_initial_acquisition() {
        let heap = heap_with_pages(16);
        let stats = heap.stats();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.grows, 1);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, INITIAL_INTERIOR);
        assert_eq!(heap.free_list_len(), 1);
        assert_eq!(
            heap.pages().events(),
            &[PageEvent::Mapped {
                base: PAGE_SIZE,
                len: DEFAULT_MIN_CHUNK_BYTES
            }]
        );
    }

    #[test]
    fn test_allocate_returns_aligned_distinct_payloads() {
        let mut heap = heap_with_pages(64);
        let mut addrs = Vec::new();
        for size in [0usize, 1, 8, 16, 17, 100, 4000] {
            let addr = heap.allocate(size).unwrap();
            assert_eq!(addr % ALIGNMENT, 0, "size={size}");
            assert!(heap.pages().is_mapped(addr, size.max(1)), "size={size}");
            addrs.push(addr);
        }
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 7);
        assert_eq!(heap.stats().live_blocks, 7);
    }

    #[test]
    fn test_allocate_zero_grants_minimum_block() {
        let mut heap = heap_with_pages(16);
        heap.allocate(0).unwrap();
        let stats = heap.stats();
        assert_eq!(stats.live_bytes, MIN_BLOCK);
        assert_eq!(stats.free_bytes, INITIAL_INTERIOR - MIN_BLOCK);
        assert_eq!(stats.splits, 1);
    }

    #[test]
    fn test_payload_round_trip_across_operations() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(256).unwrap();
        let fill_a: Vec<u8> = (0..256).map(|i| (i % 251) as u8).collect();
        heap.pages_mut().bytes_mut(a, 256).copy_from_slice(&fill_a);

        let b = heap.allocate(512).unwrap();
        heap.pages_mut().bytes_mut(b, 512).fill(0xEE);
        heap.release(b);
        heap.allocate(64).unwrap();

        assert_eq!(heap.pages().bytes(a, 256), fill_a.as_slice());
    }

    #[test]
    fn test_first_fit_prefers_most_recently_freed() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        assert_ne!(a, b);

        heap.release(a);
        let c = heap.allocate(16).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_split_carves_front_and_registers_remainder() {
        let mut heap = heap_with_pages(16);

        let a = heap.allocate(4000).unwrap();
        assert_eq!(heap.stats().live_bytes, 4016);
        assert_eq!(heap.stats().free_bytes, INITIAL_INTERIOR - 4016);
        assert_eq!(heap.stats().free_blocks, 1);

        heap.release(a);
        assert_eq!(heap.stats().free_bytes, INITIAL_INTERIOR);
        assert_eq!(heap.stats().free_blocks, 1);

        let b = heap.allocate(16).unwrap();
        assert_eq!(b, a);
        assert_eq!(heap.stats().free_bytes, INITIAL_INTERIOR - MIN_BLOCK);
        assert_eq!(heap.stats().free_blocks, 1);
        assert_eq!(heap.free_list_len(), 1);
    }

    #[test]
    fn test_coalescing_is_complete_in_every_free_order() {
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut heap = heap_with_pages(16);
            let blocks = [
                heap.allocate(32).unwrap(),
                heap.allocate(32).unwrap(),
                heap.allocate(32).unwrap(),
            ];
            let _guard = heap.allocate(32).unwrap();

            for &i in &order {
                heap.release(blocks[i]);
            }

            let stats = heap.stats();
            assert_eq!(stats.free_blocks, 2, "order={order:?}");
            assert_eq!(stats.coalesces, 2, "order={order:?}");
            assert_eq!(heap.free_list_len(), 2, "order={order:?}");
            heap.check().unwrap();

            // The merged front block is reusable as one piece.
            let merged = heap.allocate(3 * 48 - TAG_OVERHEAD).unwrap();
            assert_eq!(merged, blocks[0], "order={order:?}");
        }
    }

    #[test]
    fn test_full_chunk_reclamation_unmaps_exact_span() {
        let mut heap = heap_with_pages(64);
        heap.pages_mut().drain_events();

        // need + chunk overhead lands exactly on 16 pages.
        let size = 16 * PAGE_SIZE - CHUNK_OVERHEAD - TAG_OVERHEAD;
        let a = heap.allocate(size).unwrap();
        assert_eq!(heap.stats().chunks, 2);

        heap.release(a);
        let events = heap.pages_mut().drain_events();
        let base = a - CHUNK_OVERHEAD;
        assert_eq!(
            events,
            vec![
                PageEvent::Mapped {
                    base,
                    len: 16 * PAGE_SIZE
                },
                PageEvent::Unmapped {
                    base,
                    len: 16 * PAGE_SIZE
                },
            ]
        );
        assert_eq!(heap.stats().chunks, 1);
        assert_eq!(heap.stats().chunk_releases, 1);
        assert_eq!(heap.pages().unmap_count(), 1);
    }

    #[test]
    fn test_releasing_last_chunk_empties_heap_and_reuse_works() {
        let mut heap = heap_with_pages(16);

        // Fills the initial chunk's interior exactly (leftover 16, no split).
        let a = heap.allocate(INITIAL_INTERIOR - TAG_OVERHEAD).unwrap();
        assert_eq!(heap.free_list_len(), 0);
        assert_eq!(heap.stats().free_bytes, 0);

        heap.release(a);
        assert_eq!(heap.stats().chunks, 0);
        assert_eq!(heap.pages().mapped_bytes(), 0);
        assert_eq!(heap.free_list_len(), 0);

        let b = heap.allocate(8).unwrap();
        assert_eq!(b % ALIGNMENT, 0);
        assert_eq!(heap.stats().chunks, 1);
    }

    #[test]
    fn test_release_rejects_bad_addresses() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(64).unwrap();
        let before = heap.stats();

        heap.release(0);
        heap.release(a + 8); // misaligned
        heap.release(0x40_0000); // far outside any mapping

        let after = heap.stats();
        assert_eq!(after.rejected_releases, 3);
        assert_eq!(after.releases, 0);
        assert_eq!(after.live_blocks, before.live_blocks);
        assert_eq!(after.free_bytes, before.free_bytes);
        assert!(
            heap.records()
                .iter()
                .any(|r| r.level == RecordLevel::Warn && r.event == "reject")
        );
        heap.check().unwrap();
    }

    #[test]
    fn test_release_rejects_double_free() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(64).unwrap();
        heap.release(a);
        heap.release(a);

        let stats = heap.stats();
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.rejected_releases, 1);
        heap.check().unwrap();

        // The block is still usable.
        let b = heap.allocate(64).unwrap();
        assert_eq!(b, a);
    }

    #[test]
    fn test_allocate_propagates_exhaustion() {
        let mut heap = heap_with_pages(10);
        let err = heap.allocate(100_000).unwrap_err();
        assert!(matches!(
            err,
            AllocError::OutOfPages(MapError::Exhausted { .. })
        ));
        assert_eq!(heap.stats().failed_allocations, 1);

        // The existing chunk still serves smaller requests.
        heap.allocate(64).unwrap();
    }

    #[test]
    fn test_oversized_request_is_rejected_and_recorded() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(100).unwrap();

        // Padding usize::MAX overflows outright.
        assert_eq!(
            heap.allocate(usize::MAX),
            Err(AllocError::RequestTooLarge { size: usize::MAX })
        );
        // This one pads fine, but no whole number of pages covers it.
        assert!(matches!(
            heap.allocate(usize::MAX - 64),
            Err(AllocError::RequestTooLarge { .. })
        ));

        let stats = heap.stats();
        assert_eq!(stats.failed_allocations, 2);
        assert_eq!(stats.grows, 1);
        assert_eq!(stats.live_blocks, 1);
        assert!(
            heap.records()
                .iter()
                .any(|r| r.level == RecordLevel::Warn && r.outcome == "request_too_large")
        );
        heap.check().unwrap();

        // The heap still serves normal requests afterwards.
        heap.release(a);
        let b = heap.allocate(100).unwrap();
        assert_eq!(b, a);
    }

    #[test]
    fn test_records_narrate_lifecycle() {
        let mut heap = heap_with_pages(16);
        let a = heap.allocate(100).unwrap();
        heap.release(a);

        let records = heap.drain_records();
        assert!(records.len() >= 3);
        assert_eq!(records[0].op, "new");
        assert_eq!(records[0].event, "grow");
        assert!(records.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(
            records
                .iter()
                .any(|r| r.event == "alloc" && r.level == RecordLevel::Trace && r.addr == Some(a))
        );
        assert!(records.iter().any(|r| r.event == "free"));
        assert!(heap.records().is_empty());
    }

    #[test]
    fn test_stats_conserve_mapped_bytes() {
        let mut heap = heap_with_pages(64);
        let assert_conserved = |heap: &Heap<PagePool>, at: &str| {
            let stats = heap.stats();
            assert_eq!(
                stats.live_bytes + stats.free_bytes + stats.chunks * CHUNK_OVERHEAD,
                heap.pages().mapped_bytes(),
                "at {at}"
            );
        };

        assert_conserved(&heap, "new");
        let a = heap.allocate(100).unwrap();
        assert_conserved(&heap, "alloc a");
        let b = heap.allocate(5000).unwrap();
        assert_conserved(&heap, "alloc b");
        let c = heap.allocate(60_000).unwrap();
        assert_conserved(&heap, "alloc c (grown)");
        heap.release(b);
        assert_conserved(&heap, "release b");
        heap.release(a);
        assert_conserved(&heap, "release a");
        heap.release(c);
        assert_conserved(&heap, "release c");
    }

    #[test]
    fn test_growth_uses_configured_floor() {
        let pool = PagePool::new(64 * PAGE_SIZE);
        let policy = GrowthPolicy {
            min_chunk_bytes: 2 * PAGE_SIZE,
        };
        let heap = Heap::with_policy(pool, policy).unwrap();
        assert_eq!(heap.pages().mapped_bytes(), 2 * PAGE_SIZE);
        assert_eq!(heap.stats().free_bytes, 2 * PAGE_SIZE - CHUNK_OVERHEAD);
    }
}
