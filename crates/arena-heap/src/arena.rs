//! Offset-addressed view over the caller-supplied buffer.
//!
//! Every location inside the heap is expressed as a byte offset from the
//! arena base. The arena bytes carry no alignment guarantee, so header
//! records are moved in and out as byte arrays with unaligned accesses.

use core::{ops::Range, ptr::NonNull};

/// A contiguous memory region owned by someone else.
///
/// The arena only remembers where the buffer is; it never allocates or frees
/// it.
#[derive(Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

// The buffer is only ever touched through the owning `FreeList`, which the
// manager keeps behind its lock.
unsafe impl Send for Arena {}

impl Arena {
    /// Wraps the buffer `base..base + len`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `base..base + len` is valid for reads and writes
    /// - the region is not used by anything else except through pointers
    ///   handed out by the heap
    /// - the region stays valid for the lifetime of the arena
    pub(crate) const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn base_addr(&self) -> usize {
        self.base.addr().get()
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` lies outside the arena.
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.len,
            "offset out of arena: offset={offset:#x}, len={:#x}",
            self.len
        );
        unsafe { self.base.add(offset) }
    }

    /// Converts a pointer into the arena back to its offset.
    ///
    /// Returns `None` for pointers outside the arena.
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        ptr.addr()
            .get()
            .checked_sub(self.base_addr())
            .filter(|offset| *offset < self.len)
    }

    fn check_range(&self, range: &Range<usize>) {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "range out of arena: range={range:#x?}, len={:#x}",
            self.len
        );
    }

    /// Reads `N` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the bytes do not fit inside the arena.
    pub(crate) fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let end = offset.checked_add(N);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "read out of arena: offset={offset:#x}, size={N}, len={:#x}",
            self.len
        );
        unsafe { self.base.add(offset).cast::<[u8; N]>().read_unaligned() }
    }

    /// Writes `bytes` starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the bytes do not fit inside the arena.
    pub(crate) fn write_array<const N: usize>(&mut self, offset: usize, bytes: &[u8; N]) {
        let end = offset.checked_add(N);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "write out of arena: offset={offset:#x}, size={N}, len={:#x}",
            self.len
        );
        unsafe {
            self.base
                .add(offset)
                .cast::<[u8; N]>()
                .write_unaligned(*bytes);
        }
    }

    /// Overwrites every byte of `range` with zero.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not inside the arena.
    pub(crate) fn fill_zero(&mut self, range: Range<usize>) {
        self.check_range(&range);
        unsafe {
            self.base.add(range.start).write_bytes(0, range.len());
        }
    }
}
