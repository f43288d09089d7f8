//! Mutual exclusion for concurrent hosts.
//!
//! The heap itself is single-threaded by design. Hosts that share one heap
//! across threads wrap it in [`LockedHeap`], which serializes every call
//! through one mutex instead of each host reinventing the same wrapper.

use parking_lot::Mutex;

use tagheap_pages::PageProvider;

use crate::check::CheckError;
use crate::heap::{AllocError, Heap, HeapRecord, HeapStats};

/// A heap behind a single global lock.
pub struct LockedHeap<P> {
    inner: Mutex<Heap<P>>,
}

impl<P: PageProvider> LockedHeap<P> {
    /// Creates the heap and performs its initial chunk acquisition.
    pub fn new(pages: P) -> Result<Self, AllocError> {
        Ok(Self {
            inner: Mutex::new(Heap::new(pages)?),
        })
    }

    /// Wraps an existing heap.
    pub fn from_heap(heap: Heap<P>) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    /// See [`Heap::allocate`].
    pub fn allocate(&self, size: usize) -> Result<usize, AllocError> {
        self.inner.lock().allocate(size)
    }

    /// See [`Heap::release`].
    pub fn release(&self, addr: usize) {
        self.inner.lock().release(addr);
    }

    /// See [`Heap::stats`].
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    /// See [`Heap::check`].
    pub fn check(&self) -> Result<(), CheckError> {
        self.inner.lock().check()
    }

    /// See [`Heap::drain_records`].
    pub fn drain_records(&self) -> Vec<HeapRecord> {
        self.inner.lock().drain_records()
    }

    /// Runs `f` with exclusive access, for payload writes and provider
    /// inspection under the same lock as the allocator calls.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap<P>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagheap_pages::{PAGE_SIZE, PagePool};

    #[test]
    fn test_locked_heap_serializes_threads() {
        let heap = LockedHeap::new(PagePool::new(256 * PAGE_SIZE)).unwrap();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let heap = &heap;
                scope.spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..64 {
                        let addr = heap.allocate(16 + (t * 64 + i) % 512).unwrap();
                        held.push(addr);
                        if i % 3 == 0 {
                            if let Some(addr) = held.pop() {
                                heap.release(addr);
                            }
                        }
                    }
                    for addr in held {
                        heap.release(addr);
                    }
                });
            }
        });

        let stats = heap.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.allocations, 4 * 64);
        assert_eq!(stats.releases, 4 * 64);
        assert_eq!(stats.rejected_releases, 0);
        heap.check().unwrap();
    }

    #[test]
    fn test_with_gives_exclusive_payload_access() {
        let heap = LockedHeap::new(PagePool::new(16 * PAGE_SIZE)).unwrap();
        let addr = heap.allocate(32).unwrap();
        heap.with(|h| h.pages_mut().bytes_mut(addr, 32).fill(0xAB));
        let copied = heap.with(|h| h.pages().bytes(addr, 32).to_vec());
        assert!(copied.iter().all(|&b| b == 0xAB));
    }
}
