//! Chunk layout and growth policy.
//!
//! A chunk is one provider span wrapped in sentinels:
//!
//! ```text
//! [pad][prologue hdr][prologue ftr][interior blocks ...][epilogue hdr]
//! ```
//!
//! The pad word keeps the first payload 16-aligned. The prologue is a
//! permanently allocated block of total size 16 (header and footer only);
//! the epilogue is a permanently allocated header with size 0. Both read as
//! allocated neighbors, so coalescing can treat chunk edges like any other
//! boundary without bounds checks. A free block walled in by both sentinels
//! spans the whole chunk, which is the signal to hand the span back.

use tagheap_pages::{PAGE_SIZE, PageProvider};

use crate::tag::{self, TAG_OVERHEAD, WORD};

/// Bytes a chunk spends on bookkeeping: pad word, prologue header and
/// footer, epilogue header.
pub const CHUNK_OVERHEAD: usize = 4 * WORD;

/// Total tag size of the prologue sentinel block.
pub const PROLOGUE_SIZE: usize = TAG_OVERHEAD;

/// Default floor for fresh chunk requests: ten pages, the initial
/// acquisition size.
pub const DEFAULT_MIN_CHUNK_BYTES: usize = 10 * PAGE_SIZE;

/// Decides how much address space a fresh chunk occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Smallest span a fresh chunk may occupy, in bytes.
    pub min_chunk_bytes: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            min_chunk_bytes: DEFAULT_MIN_CHUNK_BYTES,
        }
    }
}

impl GrowthPolicy {
    /// Span length to map for a block needing `need` bytes, given the
    /// provider's page size. `None` when no representable page count covers
    /// the request, which no chunk could ever satisfy.
    ///
    /// Monotonic in `need`, never less than `need + CHUNK_OVERHEAD`, and
    /// exact (one page-aligned rounding, no multiplier) once requests exceed
    /// the floor, so a single large block can occupy, and later return, a
    /// whole chunk.
    #[must_use]
    pub fn chunk_len(&self, need: usize, page: usize) -> Option<usize> {
        let want = need.checked_add(CHUNK_OVERHEAD)?.max(self.min_chunk_bytes);
        want.div_ceil(page).checked_mul(page)
    }
}

/// Writes a fresh chunk's sentinels and its single spanning free block.
/// Returns the free block's payload address.
///
/// The caller registers the returned block; `install` only lays out memory.
pub fn install<P: PageProvider>(pages: &mut P, base: usize, len: usize) -> usize {
    let interior = len - CHUNK_OVERHEAD;
    pages.store(base, 0);
    pages.store(base + WORD, tag::pack(PROLOGUE_SIZE, true));
    pages.store(base + 2 * WORD, tag::pack(PROLOGUE_SIZE, true));

    let payload = base + CHUNK_OVERHEAD;
    pages.store(tag::header_of(payload), tag::pack(interior, false));
    pages.store(tag::footer_of(payload, interior), tag::pack(interior, false));

    pages.store(base + len - WORD, tag::pack(0, true));
    payload
}

/// Whether a predecessor's footer tag marks the prologue sentinel.
///
/// Unambiguous because real blocks are at least [`MIN_BLOCK`](crate::tag::MIN_BLOCK)
/// bytes, twice the prologue's size.
#[must_use]
pub const fn is_prologue(tag: u64) -> bool {
    tag::is_allocated(tag) && tag::size_of(tag) == PROLOGUE_SIZE
}

/// Whether a successor's header tag marks the epilogue sentinel.
#[must_use]
pub const fn is_epilogue(tag: u64) -> bool {
    tag::is_allocated(tag) && tag::size_of(tag) == 0
}

/// Base and length of the chunk owned by a free block that spans it.
#[must_use]
pub const fn span_of_full_block(payload: usize, size: usize) -> (usize, usize) {
    (payload - CHUNK_OVERHEAD, size + CHUNK_OVERHEAD)
}
