//! The page pool and the provider contract.
//!
//! The pool models an address space that begins one page above zero, so that
//! offset 0 is never a valid address and can serve as a null terminator for
//! structures the allocator stores inside mapped memory. Spans are acquired
//! and returned in whole pages; returned spans are merged with their free
//! neighbors and reused first-fit before the space is extended.

use std::collections::BTreeMap;

use thiserror::Error;

/// Native page size of the simulated address space.
pub const PAGE_SIZE: usize = 4096;

/// First mappable address. The zero page stays permanently unmapped.
const BASE_ADDR: usize = PAGE_SIZE;

/// Word width used by the typed accessors.
const WORD: usize = 8;

/// Rounds `len` up to the nearest page boundary.
#[must_use]
pub const fn page_align(len: usize) -> usize {
    (len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Reasons a `map` or `unmap` call fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// The requested length is zero or not a page multiple.
    #[error("mapping length {len} is not a positive multiple of {page} bytes")]
    Unaligned { len: usize, page: usize },
    /// The pool's byte budget cannot cover the request.
    #[error("address space exhausted: requested {requested} bytes, {available} unmapped")]
    Exhausted { requested: usize, available: usize },
    /// `unmap` named a span that no live mapping matches exactly.
    #[error("no mapping spans exactly [{base:#x}, {base:#x}+{len})")]
    NoSuchMapping { base: usize, len: usize },
}

/// Observable mapping event, drained by tests and harnesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Mapped { base: usize, len: usize },
    Unmapped { base: usize, len: usize },
}

/// Contract between the allocator and whatever owns the address space.
///
/// Span acquisition and return are fallible; memory access is not. The word
/// and byte accessors panic on unmapped or misaligned addresses, which in
/// this system always indicates an allocator bug rather than a caller error.
pub trait PageProvider {
    /// Native page granularity of this provider.
    fn page_size(&self) -> usize;

    /// Maps `len` bytes (a positive page multiple) and returns the base
    /// address of the span.
    fn map(&mut self, len: usize) -> Result<usize, MapError>;

    /// Returns a span previously obtained from [`map`](Self::map). `base`
    /// and `len` must match that mapping exactly.
    fn unmap(&mut self, base: usize, len: usize) -> Result<(), MapError>;

    /// Reads the little-endian word at `addr` (8-aligned, mapped).
    fn load(&self, addr: usize) -> u64;

    /// Writes the little-endian word at `addr` (8-aligned, mapped).
    fn store(&mut self, addr: usize, word: u64);

    /// Borrows `len` mapped bytes starting at `addr`.
    fn bytes(&self, addr: usize, len: usize) -> &[u8];

    /// Mutably borrows `len` mapped bytes starting at `addr`.
    fn bytes_mut(&mut self, addr: usize, len: usize) -> &mut [u8];

    /// Whether `[addr, addr + len)` lies inside a single live mapping.
    fn is_mapped(&self, addr: usize, len: usize) -> bool;
}

/// The simulated address space.
///
/// Backed by one growable byte arena. Live mappings and returned-but-unused
/// spans are tracked by base address; fresh space is bump-allocated at the
/// high end and retracted again when the topmost span is returned.
pub struct PagePool {
    /// Backing bytes; index 0 corresponds to `BASE_ADDR`.
    arena: Vec<u8>,
    /// Live mappings, base -> length.
    mapped: BTreeMap<usize, usize>,
    /// Returned spans available for reuse, base -> length.
    free_spans: BTreeMap<usize, usize>,
    /// Bump pointer for fresh spans.
    next_base: usize,
    /// Capacity in bytes (page-aligned).
    limit: usize,
    maps: u64,
    unmaps: u64,
    mapped_bytes: usize,
    high_water_bytes: usize,
    events: Vec<PageEvent>,
}

impl PagePool {
    /// Creates a pool with a byte budget of `limit_bytes`, rounded up to a
    /// whole page.
    #[must_use]
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            arena: Vec::new(),
            mapped: BTreeMap::new(),
            free_spans: BTreeMap::new(),
            next_base: BASE_ADDR,
            limit: page_align(limit_bytes),
            maps: 0,
            unmaps: 0,
            mapped_bytes: 0,
            high_water_bytes: 0,
            events: Vec::new(),
        }
    }

    /// Byte budget of the pool.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently mapped.
    #[must_use]
    pub fn mapped_bytes(&self) -> usize {
        self.mapped_bytes
    }

    /// Highest `mapped_bytes` ever observed.
    #[must_use]
    pub fn high_water_bytes(&self) -> usize {
        self.high_water_bytes
    }

    /// Number of successful `map` calls.
    #[must_use]
    pub fn map_count(&self) -> u64 {
        self.maps
    }

    /// Number of successful `unmap` calls.
    #[must_use]
    pub fn unmap_count(&self) -> u64 {
        self.unmaps
    }

    /// Number of live mappings.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.mapped.len()
    }

    /// Mapping events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[PageEvent] {
        &self.events
    }

    /// Removes and returns all recorded mapping events.
    pub fn drain_events(&mut self) -> Vec<PageEvent> {
        std::mem::take(&mut self.events)
    }

    fn arena_index(&self, addr: usize) -> usize {
        addr - BASE_ADDR
    }

    fn expect_mapped(&self, addr: usize, len: usize) {
        assert!(
            self.is_mapped(addr, len),
            "access to unmapped range [{addr:#x}, {:#x})",
            addr.saturating_add(len.max(1))
        );
    }

    /// Takes the first returned span that can hold `len` bytes, splitting
    /// larger spans from the front.
    fn take_free_span(&mut self, len: usize) -> Option<usize> {
        let base = self
            .free_spans
            .iter()
            .find(|&(_, &span)| span >= len)
            .map(|(&base, _)| base)?;
        let span = self.free_spans.remove(&base)?;
        if span > len {
            self.free_spans.insert(base + len, span - len);
        }
        Some(base)
    }

    fn extend_fresh(&mut self, len: usize) -> Result<usize, MapError> {
        // used stays within limit, so the comparison holds for any len.
        let used = self.next_base - BASE_ADDR;
        if len > self.limit - used {
            return Err(MapError::Exhausted {
                requested: len,
                available: self.limit - self.mapped_bytes,
            });
        }
        let base = self.next_base;
        self.next_base += len;
        let need = self.next_base - BASE_ADDR;
        if self.arena.len() < need {
            self.arena.resize(need, 0);
        }
        Ok(base)
    }

    /// Reinserts a returned span, merging with adjacent free spans. A merged
    /// span touching the bump pointer is given back to fresh space.
    fn insert_free_span(&mut self, base: usize, len: usize) {
        let mut base = base;
        let mut len = len;
        if let Some((&prev_base, &prev_len)) = self.free_spans.range(..base).next_back() {
            if prev_base + prev_len == base {
                self.free_spans.remove(&prev_base);
                base = prev_base;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free_spans.remove(&(base + len)) {
            len += next_len;
        }
        if base + len == self.next_base {
            self.next_base = base;
        } else {
            self.free_spans.insert(base, len);
        }
    }
}

impl PageProvider for PagePool {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn map(&mut self, len: usize) -> Result<usize, MapError> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned {
                len,
                page: PAGE_SIZE,
            });
        }

        let base = match self.take_free_span(len) {
            Some(base) => base,
            None => self.extend_fresh(len)?,
        };

        self.mapped.insert(base, len);
        self.mapped_bytes += len;
        self.high_water_bytes = self.high_water_bytes.max(self.mapped_bytes);
        self.maps += 1;
        self.events.push(PageEvent::Mapped { base, len });
        Ok(base)
    }

    fn unmap(&mut self, base: usize, len: usize) -> Result<(), MapError> {
        if self.mapped.get(&base) != Some(&len) {
            return Err(MapError::NoSuchMapping { base, len });
        }
        self.mapped.remove(&base);
        self.mapped_bytes -= len;
        self.unmaps += 1;
        self.events.push(PageEvent::Unmapped { base, len });
        self.insert_free_span(base, len);
        Ok(())
    }

    fn load(&self, addr: usize) -> u64 {
        assert_eq!(addr % WORD, 0, "word load at unaligned address {addr:#x}");
        self.expect_mapped(addr, WORD);
        let at = self.arena_index(addr);
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.arena[at..at + WORD]);
        u64::from_le_bytes(word)
    }

    fn store(&mut self, addr: usize, word: u64) {
        assert_eq!(addr % WORD, 0, "word store at unaligned address {addr:#x}");
        self.expect_mapped(addr, WORD);
        let at = self.arena_index(addr);
        self.arena[at..at + WORD].copy_from_slice(&word.to_le_bytes());
    }

    fn bytes(&self, addr: usize, len: usize) -> &[u8] {
        self.expect_mapped(addr, len);
        let at = self.arena_index(addr);
        &self.arena[at..at + len]
    }

    fn bytes_mut(&mut self, addr: usize, len: usize) -> &mut [u8] {
        self.expect_mapped(addr, len);
        let at = self.arena_index(addr);
        &mut self.arena[at..at + len]
    }

    fn is_mapped(&self, addr: usize, len: usize) -> bool {
        let Some((&base, &span)) = self.mapped.range(..=addr).next_back() else {
            return false;
        };
        let len = len.max(1);
        addr.checked_add(len).is_some_and(|end| end <= base + span)
    }
}
