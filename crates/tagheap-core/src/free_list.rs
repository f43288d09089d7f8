//! Intrusive free-block registry.
//!
//! Free blocks carry their own list links: the first two payload words hold
//! the previous and next member's payload address, with 0 standing for none
//! (the zero page is never mapped, so 0 can never collide with a real
//! payload). The registry itself stores only the head address; everything
//! else lives inside the free blocks. Insertion is head-first, so the scan
//! order is most-recently-freed-first.
//!
//! Caller discipline: `insert` expects the block's tags to already read
//! free, and `remove` expects the block to be a member. The registry never
//! touches tags.

use tagheap_pages::PageProvider;

use crate::tag::WORD;

/// The no-member link value.
pub const NIL: usize = 0;

const PREV_LINK: usize = 0;
const NEXT_LINK: usize = WORD;

/// Head of the intrusive free list.
#[derive(Debug, Default)]
pub struct FreeList {
    head: usize,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    /// Payload address of the first member, or [`NIL`].
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Previous-member link of a free block.
    #[must_use]
    pub fn prev_of<P: PageProvider>(pages: &P, payload: usize) -> usize {
        pages.load(payload + PREV_LINK) as usize
    }

    /// Next-member link of a free block.
    #[must_use]
    pub fn next_of<P: PageProvider>(pages: &P, payload: usize) -> usize {
        pages.load(payload + NEXT_LINK) as usize
    }

    /// Inserts a free block at the head.
    pub fn insert<P: PageProvider>(&mut self, pages: &mut P, payload: usize) {
        pages.store(payload + PREV_LINK, NIL as u64);
        pages.store(payload + NEXT_LINK, self.head as u64);
        if self.head != NIL {
            pages.store(self.head + PREV_LINK, payload as u64);
        }
        self.head = payload;
        self.len += 1;
    }

    /// Splices a member out of the list.
    pub fn remove<P: PageProvider>(&mut self, pages: &mut P, payload: usize) {
        let prev = Self::prev_of(pages, payload);
        let next = Self::next_of(pages, payload);
        if prev == NIL {
            self.head = next;
        } else {
            pages.store(prev + NEXT_LINK, next as u64);
        }
        if next != NIL {
            pages.store(next + PREV_LINK, prev as u64);
        }
        self.len -= 1;
    }

    /// Whether `payload` is a member, by walking the links.
    #[must_use]
    pub fn contains<P: PageProvider>(&self, pages: &P, payload: usize) -> bool {
        let mut cursor = self.head;
        let mut remaining = self.len;
        while cursor != NIL && remaining > 0 {
            if cursor == payload {
                return true;
            }
            cursor = Self::next_of(pages, cursor);
            remaining -= 1;
        }
        false
    }
}
