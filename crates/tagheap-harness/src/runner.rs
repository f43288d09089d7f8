//! Trace replay and validation.
//!
//! The runner replays a [`TraceFixture`] against a fresh heap over a fresh
//! page pool and validates observable behavior as it goes: alignment and
//! residency of returned payloads, pairwise payload disjointness, payload
//! byte round-trips, rejected releases, byte conservation, and periodic
//! whole-heap tag/registry audits. Violations are collected in the report
//! rather than panicking, so one broken trace still yields a full account.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use tagheap_core::{ALIGNMENT, CHUNK_OVERHEAD, Heap};
use tagheap_pages::{PAGE_SIZE, PageEvent, PagePool, PageProvider};

use crate::trace::{TraceError, TraceFixture, TraceOp};

/// Replays fixtures against a fresh heap.
#[derive(Debug, Clone, Copy)]
pub struct TraceRunner {
    /// Run the whole-heap audit every N ops. Zero audits only at the end.
    pub check_every: usize,
}

impl Default for TraceRunner {
    fn default() -> Self {
        Self { check_every: 1 }
    }
}

/// Outcome of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub fixture: String,
    pub passed: bool,
    pub ops_executed: usize,
    /// Human-readable validation failures, empty on a clean run.
    pub failures: Vec<String>,
    pub peak_live_blocks: usize,
    pub peak_live_bytes: usize,
    pub maps: u64,
    pub unmaps: u64,
    /// SHA-256 over the canonical map/unmap event stream.
    pub events_sha256: String,
}

struct LiveAlloc {
    addr: usize,
    size: usize,
}

impl TraceRunner {
    /// Replays `fixture` and reports what held.
    ///
    /// Returns `Err` only for malformed fixtures or a failed heap bring-up;
    /// property violations during replay land in [`TraceReport::failures`].
    pub fn run(&self, fixture: &TraceFixture) -> Result<TraceReport, TraceError> {
        fixture.validate()?;

        let pool_bytes = fixture
            .page_limit
            .checked_mul(PAGE_SIZE)
            .ok_or(TraceError::PageLimitTooLarge {
                page_limit: fixture.page_limit,
            })?;
        let mut heap = Heap::new(PagePool::new(pool_bytes))?;
        let mut live: BTreeMap<u64, LiveAlloc> = BTreeMap::new();
        let mut failed: BTreeSet<u64> = BTreeSet::new();
        let mut failures: Vec<String> = Vec::new();
        let mut peak_live_blocks = 0usize;
        let mut peak_live_bytes = 0usize;

        for (index, op) in fixture.ops.iter().enumerate() {
            match *op {
                TraceOp::Allocate { id, size } => match heap.allocate(size) {
                    Ok(addr) => {
                        if addr % ALIGNMENT != 0 {
                            failures.push(format!(
                                "op {index}: id {id} payload {addr:#x} not {ALIGNMENT}-byte aligned"
                            ));
                        }
                        if !heap.pages().is_mapped(addr, size) {
                            failures.push(format!(
                                "op {index}: id {id} payload {addr:#x}+{size} not mapped"
                            ));
                        }
                        for (&other, entry) in &live {
                            if overlaps(addr, size, entry.addr, entry.size) {
                                failures.push(format!(
                                    "op {index}: id {id} payload {addr:#x}+{size} overlaps id {other}"
                                ));
                            }
                        }
                        fill_payload(&mut heap, id, addr, size);
                        live.insert(id, LiveAlloc { addr, size });
                    }
                    Err(err) => {
                        failures.push(format!("op {index}: allocate({size}) for id {id}: {err}"));
                        failed.insert(id);
                    }
                },
                TraceOp::Release { id } => {
                    // The matching allocate failed at runtime; its release
                    // has nothing to hand back.
                    if failed.remove(&id) {
                        continue;
                    }
                    let Some(entry) = live.remove(&id) else {
                        continue;
                    };
                    if let Some(broken_at) = verify_payload(&heap, id, entry.addr, entry.size) {
                        failures.push(format!(
                            "op {index}: id {id} payload byte {broken_at} clobbered before release"
                        ));
                    }
                    let rejected_before = heap.stats().rejected_releases;
                    heap.release(entry.addr);
                    if heap.stats().rejected_releases != rejected_before {
                        failures.push(format!(
                            "op {index}: release of live id {id} at {:#x} was rejected",
                            entry.addr
                        ));
                    }
                }
            }

            let stats = heap.stats();
            peak_live_blocks = peak_live_blocks.max(stats.live_blocks);
            peak_live_bytes = peak_live_bytes.max(stats.live_bytes);

            let covered = stats.live_bytes + stats.free_bytes + stats.chunks * CHUNK_OVERHEAD;
            if covered != heap.pages().mapped_bytes() {
                failures.push(format!(
                    "op {index}: tags cover {covered} bytes of {} mapped",
                    heap.pages().mapped_bytes()
                ));
            }

            if self.check_every > 0 && (index + 1) % self.check_every == 0 {
                if let Err(err) = heap.check() {
                    failures.push(format!("op {index}: heap audit failed: {err}"));
                }
            }
        }

        if let Err(err) = heap.check() {
            failures.push(format!("final heap audit failed: {err}"));
        }
        if fixture.expect_all_returned {
            if !live.is_empty() {
                failures.push(format!("trace left {} ids live at the end", live.len()));
            }
            let stats = heap.stats();
            if stats.chunks != 0 || heap.pages().mapped_bytes() != 0 {
                failures.push(format!(
                    "expected all pages returned, still holding {} chunks / {} bytes",
                    stats.chunks,
                    heap.pages().mapped_bytes()
                ));
            }
        }

        let maps = heap.pages().map_count();
        let unmaps = heap.pages().unmap_count();
        let events_sha256 = events_digest(heap.pages().events());

        Ok(TraceReport {
            fixture: fixture.name.clone(),
            passed: failures.is_empty(),
            ops_executed: fixture.ops.len(),
            failures,
            peak_live_blocks,
            peak_live_bytes,
            maps,
            unmaps,
            events_sha256,
        })
    }
}

fn overlaps(a_addr: usize, a_size: usize, b_addr: usize, b_size: usize) -> bool {
    let a_end = a_addr + a_size.max(1);
    let b_end = b_addr + b_size.max(1);
    a_addr < b_end && b_addr < a_end
}

/// Per-id fill so a clobbered payload names its clobberer.
fn pattern_byte(id: u64, offset: usize) -> u8 {
    (id as usize).wrapping_mul(131).wrapping_add(offset) as u8
}

fn fill_payload(heap: &mut Heap<PagePool>, id: u64, addr: usize, size: usize) {
    if size == 0 {
        return;
    }
    for (offset, byte) in heap.pages_mut().bytes_mut(addr, size).iter_mut().enumerate() {
        *byte = pattern_byte(id, offset);
    }
}

/// Returns the offset of the first corrupted payload byte, if any.
fn verify_payload(heap: &Heap<PagePool>, id: u64, addr: usize, size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    heap.pages()
        .bytes(addr, size)
        .iter()
        .enumerate()
        .find(|&(offset, &byte)| byte != pattern_byte(id, offset))
        .map(|(offset, _)| offset)
}

/// Canonical digest of the provider's event history: one `map`/`unmap` line
/// per event, hashed with SHA-256. Two replays of the same fixture must
/// produce the same digest.
fn events_digest(events: &[PageEvent]) -> String {
    use sha2::Digest;
    let mut canon = String::new();
    for event in events {
        let line = match *event {
            PageEvent::Mapped { base, len } => format!("map {base:#x} {len}"),
            PageEvent::Unmapped { base, len } => format!("unmap {base:#x} {len}"),
        };
        canon.push_str(&line);
        canon.push('\n');
    }
    hex_lower(&sha2::Sha256::digest(canon.as_bytes()))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").expect("writing to String should not fail");
    }
    out
}
