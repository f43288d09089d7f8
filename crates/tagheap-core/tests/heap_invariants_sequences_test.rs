use tagheap_core::{CHUNK_OVERHEAD, Heap};
use tagheap_pages::{PAGE_SIZE, PagePool, PageProvider};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Freed,
}

fn pick_size(rng: &mut XorShift64) -> usize {
    match rng.gen_range_usize(0, 9) {
        0 => 0,
        1 => 1,
        2 => rng.gen_range_usize(2, 16),
        3..=6 => rng.gen_range_usize(17, 512),
        7 | 8 => rng.gen_range_usize(513, 8 * 1024),
        _ => rng.gen_range_usize(8 * 1024, 128 * 1024),
    }
}

fn assert_conserved(heap: &Heap<PagePool>, seed: u64, step: usize) {
    let stats = heap.stats();
    assert_eq!(
        stats.live_bytes + stats.free_bytes + stats.chunks * CHUNK_OVERHEAD,
        heap.pages().mapped_bytes(),
        "seed={seed} step={step}: mapped bytes not conserved"
    );
}

#[test]
fn deterministic_heap_sequences_hold_core_invariants() {
    // Deterministic, bounded, and intentionally simple: this is invariant
    // pressure, not a fuzz campaign.
    const SEEDS: [u64; 4] = [11, 23, 37, 53];
    const STEPS: usize = 1_500;
    const SLOTS: usize = 24;

    for seed in SEEDS {
        let mut heap = Heap::new(PagePool::new(4096 * PAGE_SIZE)).unwrap();
        let mut rng = XorShift64::new(seed);

        let mut addrs = [0usize; SLOTS];
        let mut sizes = [0usize; SLOTS];
        let mut fills = [0u8; SLOTS];
        let mut states = [SlotState::Empty; SLOTS];

        for step in 0..STEPS {
            let op = rng.gen_range_usize(0, 99);
            let idx = rng.gen_range_usize(0, SLOTS - 1);

            match op {
                // allocate (biased)
                0..=54 => {
                    if states[idx] == SlotState::Live {
                        continue;
                    }
                    let size = pick_size(&mut rng);
                    let addr = heap.allocate(size).unwrap_or_else(|err| {
                        panic!("seed={seed} step={step}: allocate({size}) failed: {err}")
                    });
                    assert_ne!(addr, 0, "seed={seed} step={step}: null payload");
                    assert_eq!(
                        addr % 16,
                        0,
                        "seed={seed} step={step}: unaligned payload {addr:#x}"
                    );

                    // The caller-visible span must not overlap any live one.
                    let end = addr + size.max(1);
                    for other in 0..SLOTS {
                        if states[other] == SlotState::Live {
                            let o_start = addrs[other];
                            let o_end = o_start + sizes[other].max(1);
                            assert!(
                                end <= o_start || o_end <= addr,
                                "seed={seed} step={step}: [{addr:#x},{end:#x}) overlaps \
                                 live slot {other} [{o_start:#x},{o_end:#x})"
                            );
                        }
                    }

                    let fill = (rng.next_u64() & 0xFF) as u8;
                    if size > 0 {
                        heap.pages_mut().bytes_mut(addr, size).fill(fill);
                    }
                    addrs[idx] = addr;
                    sizes[idx] = size;
                    fills[idx] = fill;
                    states[idx] = SlotState::Live;
                }
                // release a live slot, verifying its payload survived
                55..=94 => {
                    if states[idx] != SlotState::Live {
                        continue;
                    }
                    if sizes[idx] > 0 {
                        let bytes = heap.pages().bytes(addrs[idx], sizes[idx]);
                        assert!(
                            bytes.iter().all(|&b| b == fills[idx]),
                            "seed={seed} step={step}: slot {idx} payload clobbered"
                        );
                    }
                    heap.release(addrs[idx]);
                    states[idx] = SlotState::Freed;
                }
                // releases that must be rejected, not obeyed
                _ => {
                    let before = heap.stats().rejected_releases;
                    // An address inside the permanently unmapped zero page.
                    let junk = 16 * rng.gen_range_usize(1, PAGE_SIZE / 16 - 1);
                    heap.release(junk);
                    if states[idx] == SlotState::Live {
                        heap.release(addrs[idx] + 8);
                    }
                    let expected = if states[idx] == SlotState::Live { 2 } else { 1 };
                    assert_eq!(
                        heap.stats().rejected_releases,
                        before + expected,
                        "seed={seed} step={step}: bad releases not all rejected"
                    );
                }
            }

            heap.check()
                .unwrap_or_else(|err| panic!("seed={seed} step={step}: {err}"));
            assert_conserved(&heap, seed, step);
        }

        // Drain every live slot; full coalescing must hand all chunks back.
        for idx in 0..SLOTS {
            if states[idx] == SlotState::Live {
                if sizes[idx] > 0 {
                    let bytes = heap.pages().bytes(addrs[idx], sizes[idx]);
                    assert!(
                        bytes.iter().all(|&b| b == fills[idx]),
                        "seed={seed}: slot {idx} payload clobbered before drain"
                    );
                }
                heap.release(addrs[idx]);
                heap.check().unwrap_or_else(|err| panic!("seed={seed}: {err}"));
            }
        }

        let stats = heap.stats();
        assert_eq!(stats.live_blocks, 0, "seed={seed}: live blocks after drain");
        assert_eq!(stats.chunks, 0, "seed={seed}: chunks not returned");
        assert_eq!(
            heap.pages().mapped_bytes(),
            0,
            "seed={seed}: provider still holds bytes"
        );
        assert_eq!(
            stats.allocations,
            stats.releases,
            "seed={seed}: allocation/release counts diverge"
        );
    }
}

#[test]
fn steady_state_churn_reuses_one_chunk() {
    let mut heap = Heap::new(PagePool::new(64 * PAGE_SIZE)).unwrap();

    // One long-lived block keeps the chunk from being handed back between
    // iterations.
    let anchor = heap.allocate(16).unwrap();

    let first = heap.allocate(100).unwrap();
    heap.release(first);
    for i in 0..1_000 {
        let addr = heap.allocate(100).unwrap();
        assert_eq!(addr, first, "iteration {i}: churn moved the block");
        heap.release(addr);
    }

    let stats = heap.stats();
    assert_eq!(stats.grows, 1, "churn should never grow the heap");
    assert_eq!(stats.chunks, 1);
    assert_eq!(heap.pages().map_count(), 1);

    heap.release(anchor);
    assert_eq!(heap.stats().chunks, 0);
    assert_eq!(heap.pages().mapped_bytes(), 0);
}

#[test]
fn lone_block_churn_thrashes_and_reclaims_cleanly() {
    // Without an anchor, every cycle frees the whole chunk; the heap must
    // hand it back and re-acquire the same span each time.
    let mut heap = Heap::new(PagePool::new(64 * PAGE_SIZE)).unwrap();

    let first = heap.allocate(100).unwrap();
    heap.release(first);
    for i in 0..50 {
        let addr = heap.allocate(100).unwrap();
        assert_eq!(addr, first, "iteration {i}: provider moved the span");
        heap.release(addr);
    }

    let stats = heap.stats();
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.grows, 51);
    assert_eq!(stats.chunk_releases, 51);
    assert_eq!(heap.pages().mapped_bytes(), 0);
}
