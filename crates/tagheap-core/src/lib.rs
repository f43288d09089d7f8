//! # tagheap-core
//!
//! A boundary-tag heap allocator over a page provider.
//!
//! Blocks carry identical size-and-allocated tags at both ends, free blocks
//! thread themselves onto an intrusive doubly linked registry, allocation is
//! first-fit with splitting, and releasing merges free neighbors in constant
//! time. Memory comes from a [`PageProvider`](tagheap_pages::PageProvider)
//! in page-multiple chunks; a chunk whose interior coalesces back into one
//! free block is returned to the provider whole.
//!
//! No `unsafe` code: the "heap" is provider-owned bytes addressed by
//! `usize` offsets, and every tag, link, and payload access is bounds
//! checked by the provider.

#![deny(unsafe_code)]

pub mod check;
pub mod chunk;
pub mod free_list;
pub mod heap;
pub mod sync;
pub mod tag;

pub use check::CheckError;
pub use chunk::{CHUNK_OVERHEAD, DEFAULT_MIN_CHUNK_BYTES, GrowthPolicy};
pub use heap::{AllocError, Heap, HeapRecord, HeapStats, RecordLevel};
pub use sync::LockedHeap;
pub use tag::{ALIGNMENT, MIN_BLOCK, TAG_OVERHEAD, WORD};
