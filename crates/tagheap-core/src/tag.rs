//! Boundary tags.
//!
//! Every block begins and ends with one tag word holding the block's total
//! size with the allocated flag packed into bit 0. Sizes are multiples of 16,
//! so the low four bits of a valid tag carry no size information. The header
//! sits one word below the payload address; the footer is the last word of
//! the block. Identical tags at both ends let a neighbor be sized from either
//! side, which is what makes constant-time coalescing possible.

/// Tag word width in bytes.
pub const WORD: usize = 8;

/// Payload alignment; also the granularity of block sizes.
pub const ALIGNMENT: usize = 16;

/// Bytes a block spends on its header and footer.
pub const TAG_OVERHEAD: usize = 2 * WORD;

/// Smallest representable block: header, footer, and the two link words a
/// free block must be able to hold.
pub const MIN_BLOCK: usize = 32;

const ALLOCATED_BIT: u64 = 0x1;
const SIZE_MASK: u64 = !0xF;

/// Packs a block size and allocated flag into one tag word.
#[must_use]
pub const fn pack(size: usize, allocated: bool) -> u64 {
    size as u64 | allocated as u64
}

/// Total block size stored in a tag.
#[must_use]
pub const fn size_of(tag: u64) -> usize {
    (tag & SIZE_MASK) as usize
}

/// Allocated flag stored in a tag.
#[must_use]
pub const fn is_allocated(tag: u64) -> bool {
    tag & ALLOCATED_BIT != 0
}

/// Rounds `size` up to the block-size granularity.
#[must_use]
pub const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// [`align_up`] that reports overflow instead of wrapping.
#[must_use]
pub const fn checked_align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Address of the header word of the block with payload `payload`.
#[must_use]
pub const fn header_of(payload: usize) -> usize {
    payload - WORD
}

/// Address of the footer word of a block of total size `size`.
#[must_use]
pub const fn footer_of(payload: usize, size: usize) -> usize {
    payload + size - TAG_OVERHEAD
}

/// Payload address of the block immediately after one of total size `size`.
#[must_use]
pub const fn next_payload(payload: usize, size: usize) -> usize {
    payload + size
}

/// Payload address of the block immediately before, given that block's total
/// size (read from the footer word at `payload - TAG_OVERHEAD`).
#[must_use]
pub const fn prev_payload(payload: usize, prev_size: usize) -> usize {
    payload - prev_size
}

/// Address of the predecessor's footer word.
#[must_use]
pub const fn prev_footer_of(payload: usize) -> usize {
    payload - TAG_OVERHEAD
}
