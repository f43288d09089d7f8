//! Seeded trace synthesis.
//!
//! Generates pseudo-random allocate/release scripts from a seed, so a
//! failing run can be reproduced from two integers. Every synthesized trace
//! ends with a full drain and expects the heap to hand all pages back.

use crate::trace::{DEFAULT_PAGE_LIMIT, TraceFixture, TraceOp};

/// xorshift64* generator. Deterministic per seed, no external state.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `lo..=hi`.
    fn gen_range_usize(&mut self, lo: usize, hi: usize) -> usize {
        debug_assert!(lo <= hi);
        let span = (hi - lo) as u64 + 1;
        lo + (self.next_u64() % span) as usize
    }
}

/// Request size distribution, weighted to the small end the way real
/// workloads are, with occasional multi-page outliers.
fn pick_size(rng: &mut XorShift64) -> usize {
    match rng.gen_range_usize(0, 99) {
        0..=4 => 0,
        5..=44 => rng.gen_range_usize(1, 128),
        45..=79 => rng.gen_range_usize(129, 4096),
        80..=94 => rng.gen_range_usize(4097, 65_536),
        _ => rng.gen_range_usize(65_537, 262_144),
    }
}

/// Builds a seeded random fixture with `ops` scripted calls plus a final
/// drain of everything still live.
pub fn synth_fixture(seed: u64, ops: usize) -> TraceFixture {
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<u64> = Vec::new();
    let mut next_id: u64 = 1;
    let mut script: Vec<TraceOp> = Vec::with_capacity(ops);

    for _ in 0..ops {
        let roll = rng.gen_range_usize(0, 99);
        if roll < 60 || live.is_empty() {
            let id = next_id;
            next_id += 1;
            script.push(TraceOp::Allocate {
                id,
                size: pick_size(&mut rng),
            });
            live.push(id);
        } else {
            let at = rng.gen_range_usize(0, live.len() - 1);
            let id = live.swap_remove(at);
            script.push(TraceOp::Release { id });
        }
    }
    while let Some(id) = live.pop() {
        script.push(TraceOp::Release { id });
    }

    TraceFixture {
        name: format!("synth-{seed}"),
        description: format!("synthesized trace: seed={seed} ops={ops}"),
        page_limit: DEFAULT_PAGE_LIMIT,
        expect_all_returned: true,
        ops: script,
    }
}
