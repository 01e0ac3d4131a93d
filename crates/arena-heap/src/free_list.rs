//! The address-ordered block list and its algorithms.
//!
//! [`FreeList`] holds every block of an arena, free and used, in one doubly
//! linked chain of headers embedded in the arena itself. It implements
//! first-fit search, splitting and coalescing, but performs no locking:
//! callers serialize access through `&mut self`, which
//! [`FreeListManager`](crate::FreeListManager) does with its mutex.
//!
//! # Allocation
//!
//! The chain is scanned from the head for the first free block that is large
//! enough. If the leftover after the request can host a new header plus at
//! least `minimum_free_block` usable bytes, it becomes a new free block:
//!
//! ```text
//! before: │ H │ free, size                                   │ H │ ...
//! after:  │ H │ used, bytes          │ H │ free, size - bytes - HEADER_SIZE │ H │ ...
//! ```
//!
//! # Release
//!
//! A released block is merged with its successor first and then with its
//! predecessor, whenever those are free. The header of the lower block
//! always survives, and the absorbed header's bytes become usable space.

use core::ptr::NonNull;

use log::trace;

use crate::{
    arena::Arena,
    config::HeapConfig,
    error::{IntegrityError, IntegrityErrorKind},
    header::{BlockHeader, BlockInfo, HEADER_SIZE},
    report,
};

/// Usage summary gathered from one walk over the block list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Arena length supplied at construction.
    pub total_size: usize,
    /// Number of headers in the list.
    pub block_count: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Usable bytes in free blocks.
    pub free_bytes: usize,
    /// Usable bytes in allocated blocks, including split leftovers.
    pub used_bytes: usize,
    /// Usable size of the largest free block, or zero.
    pub largest_free: usize,
}

impl HeapStats {
    fn new(total_size: usize) -> Self {
        Self {
            total_size,
            ..Self::default()
        }
    }

    fn record(&mut self, header: &BlockHeader) {
        self.block_count += 1;
        if header.free {
            self.free_blocks += 1;
            self.free_bytes += header.size;
            self.largest_free = self.largest_free.max(header.size);
        } else {
            self.used_bytes += header.size;
        }
    }

    /// Bytes spent on header records.
    #[must_use]
    pub const fn overhead_bytes(&self) -> usize {
        self.block_count * HEADER_SIZE
    }
}

#[derive(Debug)]
pub(crate) struct FreeList {
    arena: Arena,
    head: usize,
    config: HeapConfig,
}

/// Iterator over header offsets in address order.
struct Offsets<'a> {
    list: &'a FreeList,
    next: Option<usize>,
}

impl Iterator for Offsets<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        let header = self.list.header(offset);
        self.next = header.next;
        Some((offset, header))
    }
}

impl FreeList {
    /// Installs a single free block spanning the whole arena.
    ///
    /// # Panics
    ///
    /// Panics if the arena cannot hold a header and at least one usable
    /// byte.
    pub(crate) fn new(mut arena: Arena, config: HeapConfig) -> Self {
        assert!(
            arena.len() > HEADER_SIZE,
            "arena too small for a block: len={}",
            arena.len()
        );
        let head = 0;
        BlockHeader::new(arena.len() - HEADER_SIZE).store(&mut arena, head);
        Self {
            arena,
            head,
            config,
        }
    }

    pub(crate) fn total_size(&self) -> usize {
        self.arena.len()
    }

    /// Reads the header at `offset`, treating a malformed record as fatal.
    fn header(&self, offset: usize) -> BlockHeader {
        BlockHeader::load(&self.arena, offset).unwrap_or_else(|err| report::fatal(err))
    }

    fn set_header(&mut self, offset: usize, header: &BlockHeader) {
        header.store(&mut self.arena, offset);
    }

    /// Points the `prev` link of the header at `offset` to `prev`.
    fn relink_prev(&mut self, offset: Option<usize>, prev: usize) {
        if let Some(offset) = offset {
            let mut header = self.header(offset);
            header.prev = Some(prev);
            self.set_header(offset, &header);
        }
    }

    fn iter(&self) -> Offsets<'_> {
        Offsets {
            list: self,
            next: Some(self.head),
        }
    }

    /// Returns the offset of the first free block with at least `bytes`
    /// usable bytes.
    pub(crate) fn find_first_fit(&self, bytes: usize) -> Option<usize> {
        self.iter()
            .find(|(_, header)| header.free && header.size >= bytes)
            .map(|(offset, _)| offset)
    }

    /// Returns the offset of the header whose usable region starts at `ptr`.
    pub(crate) fn find_block(&self, ptr: NonNull<u8>) -> Option<usize> {
        let target = self.arena.offset_of(ptr)?;
        self.iter()
            .map(|(offset, _)| offset)
            .take_while(|offset| BlockHeader::region_start(*offset) <= target)
            .find(|offset| BlockHeader::region_start(*offset) == target)
    }

    pub(crate) fn is_free(&self, offset: usize) -> bool {
        self.header(offset).free
    }

    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        self.arena.ptr_at(offset)
    }

    /// Hands out the free block at `offset` for a request of `bytes`.
    ///
    /// Splits off the leftover as a new free block when it is large enough,
    /// marks the block used and zero-fills its whole usable region. Returns
    /// a pointer to the first usable byte.
    ///
    /// # Panics
    ///
    /// Panics if the block is not free or smaller than `bytes`, or if
    /// `bytes` is zero.
    pub(crate) fn allocate_block(&mut self, offset: usize, bytes: usize) -> NonNull<u8> {
        let mut header = self.header(offset);
        assert!(bytes > 0, "zero-byte block requested");
        assert!(header.free, "block is not free: offset={offset:#x}");
        assert!(
            header.size >= bytes,
            "block too small: offset={offset:#x}, size={}, bytes={bytes}",
            header.size
        );

        let remaining = header.size - bytes;
        let split = remaining
            .checked_sub(HEADER_SIZE)
            .is_some_and(|rest| rest >= self.config.minimum_free_block);
        if split {
            let split_offset = BlockHeader::region_start(offset) + bytes;
            let rest = BlockHeader {
                size: remaining - HEADER_SIZE,
                free: true,
                prev: Some(offset),
                next: header.next,
            };
            self.relink_prev(header.next, split_offset);
            self.set_header(split_offset, &rest);
            header.next = Some(split_offset);
            header.size = bytes;
            trace!(
                "split block {offset:#x}: used={bytes}, rest={split_offset:#x} size={}",
                rest.size
            );
        }

        header.free = false;
        self.set_header(offset, &header);

        let region = header.region(offset);
        let start = region.start;
        self.arena.fill_zero(region);
        self.arena.ptr_at(start)
    }

    /// Absorbs the block following `offset` into it.
    ///
    /// Returns `offset`, which describes the combined region.
    ///
    /// # Panics
    ///
    /// Panics if the block at `offset` has no successor.
    pub(crate) fn merge_next(&mut self, offset: usize) -> usize {
        let mut header = self.header(offset);
        let next_offset = header.next.expect("merge_next on the tail block");
        let next = self.header(next_offset);

        header.size += HEADER_SIZE + next.size;
        header.next = next.next;
        self.relink_prev(next.next, offset);
        self.set_header(offset, &header);

        trace!("merged block {next_offset:#x} into {offset:#x}: size={}", header.size);
        offset
    }

    /// Absorbs the block at `offset` into its predecessor.
    ///
    /// Returns the predecessor's offset, which describes the combined
    /// region.
    ///
    /// # Panics
    ///
    /// Panics if the block at `offset` has no predecessor.
    pub(crate) fn merge_prev(&mut self, offset: usize) -> usize {
        let header = self.header(offset);
        let prev_offset = header.prev.expect("merge_prev on the head block");
        let mut prev = self.header(prev_offset);

        prev.size += HEADER_SIZE + header.size;
        prev.next = header.next;
        self.relink_prev(header.next, prev_offset);
        self.set_header(prev_offset, &prev);

        trace!("merged block {offset:#x} into {prev_offset:#x}: size={}", prev.size);
        prev_offset
    }

    /// Marks the used block at `offset` free and coalesces it with free
    /// neighbours, successor first.
    ///
    /// Returns the offset of the header describing the resulting free
    /// region.
    ///
    /// # Panics
    ///
    /// Panics if the block is already free.
    pub(crate) fn release(&mut self, offset: usize) -> usize {
        let mut header = self.header(offset);
        assert!(!header.free, "block is already free: offset={offset:#x}");
        header.free = true;
        self.set_header(offset, &header);

        let mut survivor = offset;
        if header.next.is_some_and(|next| self.is_free(next)) {
            survivor = self.merge_next(survivor);
        }
        if header.prev.is_some_and(|prev| self.is_free(prev)) {
            survivor = self.merge_prev(survivor);
        }
        survivor
    }

    /// Walks the whole list and checks every invariant.
    ///
    /// Besides the per-header checks, verifies that `prev` links mirror the
    /// walk and that headers and regions together account for exactly the
    /// arena length.
    pub(crate) fn check(&self) -> Result<HeapStats, IntegrityError> {
        let total = self.total_size();
        let mut stats = HeapStats::new(total);
        let mut accounted = 0_usize;
        let mut expected_prev = None;
        let mut cursor = Some(self.head);

        while let Some(offset) = cursor {
            let header = BlockHeader::load(&self.arena, offset)?;
            if header.prev != expected_prev {
                return Err(IntegrityError::new(
                    offset,
                    IntegrityErrorKind::UnexpectedPrev {
                        found: header.prev,
                        expected: expected_prev,
                    },
                ));
            }
            header.validate(offset, &self.arena)?;

            // every block is at least one byte past its header, so a cycle
            // overruns the total before it can loop forever
            accounted = accounted.saturating_add(HEADER_SIZE + header.size);
            if accounted > total {
                return Err(IntegrityError::new(
                    offset,
                    IntegrityErrorKind::Conservation { accounted, total },
                ));
            }

            stats.record(&header);
            expected_prev = Some(offset);
            cursor = header.next;
        }

        if accounted != total {
            return Err(IntegrityError::new(
                self.head,
                IntegrityErrorKind::Conservation { accounted, total },
            ));
        }
        Ok(stats)
    }

    /// Usage summary without the integrity checks of [`Self::check`].
    pub(crate) fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::new(self.total_size());
        for (_, header) in self.iter() {
            stats.record(&header);
        }
        stats
    }

    pub(crate) fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.iter()
            .map(|(offset, header)| header.describe(offset, &self.arena))
    }

    #[cfg(test)]
    fn corrupt(&mut self, offset: usize, f: impl FnOnce(&mut BlockHeader)) {
        let mut header = self.header(offset);
        f(&mut header);
        self.set_header(offset, &header);
    }
}
