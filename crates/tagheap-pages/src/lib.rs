//! # tagheap-pages
//!
//! Simulated page-granular address space for the TagHeap allocator.
//!
//! `PagePool` stands in for the operating system's page mapper: it hands out
//! page-multiple spans of a flat address space and takes exact spans back.
//! Addresses are plain `usize` offsets into an owned byte arena, so the
//! allocator layered above can stay in safe Rust. The [`PageProvider`] trait
//! captures the contract the allocator codes against.

#![deny(unsafe_code)]

pub mod pool;

pub use pool::{MapError, PAGE_SIZE, PageEvent, PagePool, PageProvider, page_align};
