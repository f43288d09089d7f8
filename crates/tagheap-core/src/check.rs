//! Whole-heap invariant checker.
//!
//! Walks every live chunk from prologue to epilogue and cross-checks the
//! walk against the registry. The checker is read-only and runs in O(heap);
//! tests and the trace harness call it between operations, hosts can call it
//! whenever they suspect corruption.

use thiserror::Error;

use tagheap_pages::PageProvider;

use crate::chunk::{self, CHUNK_OVERHEAD, PROLOGUE_SIZE};
use crate::free_list::{FreeList, NIL};
use crate::heap::Heap;
use crate::tag::{self, ALIGNMENT, MIN_BLOCK, WORD};

/// First invariant violation found by [`Heap::check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("chunk at {base:#x}: bad prologue or epilogue sentinel")]
    BadSentinel { base: usize },
    #[error("block at {payload:#x}: size {size} is unaligned or impossibly small")]
    BadSize { payload: usize, size: usize },
    #[error("block at {payload:#x}: header {header:#x} disagrees with footer {footer:#x}")]
    TagMismatch {
        payload: usize,
        header: u64,
        footer: u64,
    },
    #[error("block at {payload:#x} runs past its chunk (base {base:#x}, len {len})")]
    OutOfChunk {
        payload: usize,
        base: usize,
        len: usize,
    },
    #[error("adjacent free blocks at {payload:#x} and {next:#x}")]
    AdjacentFree { payload: usize, next: usize },
    #[error("chunk at {base:#x}: interior covers {covered} of {expected} bytes")]
    Unconserved {
        base: usize,
        covered: usize,
        expected: usize,
    },
    #[error("free block at {payload:#x} is not in the registry")]
    Unregistered { payload: usize },
    #[error("registry entry at {payload:#x} is not a live free block")]
    BadRegistryEntry { payload: usize },
    #[error("registry lists {listed} blocks but the walk found {walked}")]
    RegistryCount { listed: usize, walked: usize },
}

impl<P: PageProvider> Heap<P> {
    /// Verifies every heap invariant and returns the first violation.
    ///
    /// Checked per chunk: sentinel integrity, tag agreement, size sanity,
    /// containment, no adjacent free blocks, and byte conservation. Checked
    /// globally: the registry and the chunk walk agree on the set of free
    /// blocks.
    pub fn check(&self) -> Result<(), CheckError> {
        let mut walked_free = 0usize;

        for (&base, &len) in &self.chunks {
            walked_free += self.check_chunk(base, len)?;
        }

        let listed = self.registry.len();
        if listed != walked_free {
            return Err(CheckError::RegistryCount {
                listed,
                walked: walked_free,
            });
        }

        let mut cursor = self.registry.head();
        let mut remaining = listed;
        while cursor != NIL && remaining > 0 {
            if !self.is_free_interior_block(cursor) {
                return Err(CheckError::BadRegistryEntry { payload: cursor });
            }
            cursor = FreeList::next_of(&self.pages, cursor);
            remaining -= 1;
        }
        if cursor != NIL {
            // More links than members: the list is cyclic or oversized.
            return Err(CheckError::RegistryCount {
                listed,
                walked: walked_free,
            });
        }

        Ok(())
    }

    /// Walks one chunk; returns the number of free interior blocks.
    fn check_chunk(&self, base: usize, len: usize) -> Result<usize, CheckError> {
        let prologue = tag::pack(PROLOGUE_SIZE, true);
        if self.pages.load(base + WORD) != prologue
            || self.pages.load(base + 2 * WORD) != prologue
        {
            return Err(CheckError::BadSentinel { base });
        }

        let epilogue_at = base + len - WORD;
        let mut free_count = 0usize;
        let mut prev_free = false;
        let mut prev_payload = 0usize;
        let mut payload = base + CHUNK_OVERHEAD;

        while tag::header_of(payload) < epilogue_at {
            let header = self.pages.load(tag::header_of(payload));
            let size = tag::size_of(header);

            if size == 0 {
                // Epilogue-shaped tag in the middle of the chunk.
                return Err(CheckError::Unconserved {
                    base,
                    covered: tag::header_of(payload) - base - 3 * WORD,
                    expected: len - CHUNK_OVERHEAD,
                });
            }
            if size < MIN_BLOCK || size % ALIGNMENT != 0 {
                return Err(CheckError::BadSize { payload, size });
            }
            // Compared this way round so a corrupt giant size is reported,
            // not overflowed on.
            if size > epilogue_at - tag::header_of(payload) {
                return Err(CheckError::OutOfChunk { payload, base, len });
            }
            let footer = self.pages.load(tag::footer_of(payload, size));
            if footer != header {
                return Err(CheckError::TagMismatch {
                    payload,
                    header,
                    footer,
                });
            }

            let free = !tag::is_allocated(header);
            if free {
                if prev_free {
                    return Err(CheckError::AdjacentFree {
                        payload: prev_payload,
                        next: payload,
                    });
                }
                if !self.registry.contains(&self.pages, payload) {
                    return Err(CheckError::Unregistered { payload });
                }
                free_count += 1;
            }
            prev_free = free;
            prev_payload = payload;
            payload = tag::next_payload(payload, size);
        }

        if tag::header_of(payload) != epilogue_at
            || !chunk::is_epilogue(self.pages.load(epilogue_at))
        {
            return Err(CheckError::BadSentinel { base });
        }

        Ok(free_count)
    }

    /// Whether `payload` is a free, well-tagged interior block of some chunk.
    fn is_free_interior_block(&self, payload: usize) -> bool {
        if payload % ALIGNMENT != 0 || !self.pages.is_mapped(tag::header_of(payload), WORD) {
            return false;
        }
        let header = self.pages.load(tag::header_of(payload));
        let size = tag::size_of(header);
        if tag::is_allocated(header) || size < MIN_BLOCK || size % ALIGNMENT != 0 {
            return false;
        }
        if !self.pages.is_mapped(tag::header_of(payload), size) {
            return false;
        }
        self.pages.load(tag::footer_of(payload, size)) == header
    }
}
