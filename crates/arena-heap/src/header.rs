//! Block header records.
//!
//! Every block of the arena starts with a header describing the usable
//! region that follows it. Headers form a doubly linked list ordered by
//! increasing offset, covering the whole arena without gaps:
//!
//! ```text
//! offset 0                                                        arena.len()
//! ┌────────┬──────────────┬────────┬──────────────────┬────────┬──────────┐
//! │ header │ region (used)│ header │  region (free)   │ header │  region  │
//! └────────┴──────────────┴────────┴──────────────────┴────────┴──────────┘
//!  ◄──────────────────────► next ►                     ◄ prev
//!  HEADER_SIZE + size
//! ```
//!
//! # On-arena encoding
//!
//! | Field   | Type    | Notes                                  |
//! |---------|---------|----------------------------------------|
//! | `magic` | `u32`   | [`HEADER_MAGIC`], detects stray writes |
//! | `state` | `u32`   | free / used tag                        |
//! | `size`  | `usize` | usable bytes after the header          |
//! | `prev`  | `usize` | offset of previous header or `NIL`     |
//! | `next`  | `usize` | offset of next header or `NIL`         |
//!
//! All fields are stored in native byte order.

use core::ops::Range;

use crate::{
    arena::Arena,
    error::{IntegrityError, IntegrityErrorKind},
};

/// Tag stored at the start of every live header.
pub const HEADER_MAGIC: u32 = 0x4845_4150;

const STATE_FREE: u32 = 0x4652_4545;
const STATE_USED: u32 = 0x5553_4544;
const NIL: usize = usize::MAX;

const WORD: usize = size_of::<usize>();
const MAGIC_AT: usize = 0;
const STATE_AT: usize = MAGIC_AT + size_of::<u32>();
const SIZE_AT: usize = STATE_AT + size_of::<u32>();
const PREV_AT: usize = SIZE_AT + WORD;
const NEXT_AT: usize = PREV_AT + WORD;

/// Bytes a header occupies in the arena.
pub const HEADER_SIZE: usize = NEXT_AT + WORD;

/// Metadata of one contiguous block of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Usable bytes following the header, excluding the header itself.
    pub size: usize,
    /// Whether the block is available for allocation.
    pub free: bool,
    /// Offset of the previous header in address order.
    pub prev: Option<usize>,
    /// Offset of the next header in address order.
    pub next: Option<usize>,
}

/// Read-only snapshot of one block, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display("address[{address:#x}] | size[{size}] | free[{}]", u8::from(*free))]
pub struct BlockInfo {
    /// Address of the header record.
    pub address: usize,
    /// Offset of the header record from the arena base.
    pub offset: usize,
    /// Usable bytes following the header.
    pub size: usize,
    /// Whether the block is available for allocation.
    pub free: bool,
}

impl BlockInfo {
    /// Address of the first usable byte of the block.
    #[must_use]
    pub const fn region_start(&self) -> usize {
        self.address + HEADER_SIZE
    }

    /// Address one past the last usable byte of the block.
    #[must_use]
    pub const fn region_end(&self) -> usize {
        self.region_start() + self.size
    }
}

fn encode_link(link: Option<usize>) -> usize {
    link.unwrap_or(NIL)
}

fn decode_link(raw: usize) -> Option<usize> {
    (raw != NIL).then_some(raw)
}

fn word_at(bytes: &[u8; HEADER_SIZE], at: usize) -> usize {
    let mut word = [0; WORD];
    word.copy_from_slice(&bytes[at..at + WORD]);
    usize::from_ne_bytes(word)
}

fn u32_at(bytes: &[u8; HEADER_SIZE], at: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}

impl BlockHeader {
    /// Creates an unlinked free header.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            free: true,
            prev: None,
            next: None,
        }
    }

    /// Offset of the first usable byte of the block whose header sits at
    /// `offset`.
    #[must_use]
    pub const fn region_start(offset: usize) -> usize {
        offset + HEADER_SIZE
    }

    /// Usable byte range of the block whose header sits at `offset`.
    #[must_use]
    pub const fn region(&self, offset: usize) -> Range<usize> {
        let start = Self::region_start(offset);
        start..start + self.size
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0; HEADER_SIZE];
        let state = if self.free { STATE_FREE } else { STATE_USED };
        bytes[MAGIC_AT..STATE_AT].copy_from_slice(&HEADER_MAGIC.to_ne_bytes());
        bytes[STATE_AT..SIZE_AT].copy_from_slice(&state.to_ne_bytes());
        bytes[SIZE_AT..PREV_AT].copy_from_slice(&self.size.to_ne_bytes());
        bytes[PREV_AT..NEXT_AT].copy_from_slice(&encode_link(self.prev).to_ne_bytes());
        bytes[NEXT_AT..].copy_from_slice(&encode_link(self.next).to_ne_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, IntegrityErrorKind> {
        let magic = u32_at(bytes, MAGIC_AT);
        if magic != HEADER_MAGIC {
            return Err(IntegrityErrorKind::BadMagic { magic });
        }
        let free = match u32_at(bytes, STATE_AT) {
            STATE_FREE => true,
            STATE_USED => false,
            state => return Err(IntegrityErrorKind::BadState { state }),
        };
        Ok(Self {
            size: word_at(bytes, SIZE_AT),
            free,
            prev: decode_link(word_at(bytes, PREV_AT)),
            next: decode_link(word_at(bytes, NEXT_AT)),
        })
    }

    /// Reads the header stored at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the header record does not fit inside the arena.
    pub(crate) fn load(arena: &Arena, offset: usize) -> Result<Self, IntegrityError> {
        Self::decode(&arena.read_array(offset)).map_err(|kind| IntegrityError::new(offset, kind))
    }

    /// Writes this header to `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the header record does not fit inside the arena.
    pub(crate) fn store(&self, arena: &mut Arena, offset: usize) {
        arena.write_array(offset, &self.encode());
    }

    /// Checks the linkage and size invariants of the header at `offset`.
    ///
    /// Neighbouring headers are loaded from the arena to verify that they
    /// link back to this one. Must only be called while the owning list is
    /// locked.
    pub(crate) fn validate(&self, offset: usize, arena: &Arena) -> Result<(), IntegrityError> {
        let fault = |kind| Err(IntegrityError::new(offset, kind));

        if self.size == 0 {
            return fault(IntegrityErrorKind::ZeroSize);
        }

        let region_end = Self::region_start(offset)
            .checked_add(self.size)
            .filter(|end| *end <= arena.len());
        let Some(region_end) = region_end else {
            return fault(IntegrityErrorKind::OutOfBounds {
                region_end: Self::region_start(offset).saturating_add(self.size),
                arena_len: arena.len(),
            });
        };

        match self.next {
            Some(next) => {
                if next != region_end {
                    return fault(IntegrityErrorKind::NotContiguous { region_end, next });
                }
                if next + HEADER_SIZE > arena.len() {
                    return fault(IntegrityErrorKind::OutOfBounds {
                        region_end: next + HEADER_SIZE,
                        arena_len: arena.len(),
                    });
                }
                let next_header = Self::load(arena, next)?;
                if next_header.prev != Some(offset) {
                    return fault(IntegrityErrorKind::BrokenNextLink {
                        next,
                        next_prev: next_header.prev,
                    });
                }
            }
            None => {
                if region_end != arena.len() {
                    return fault(IntegrityErrorKind::ShortTail {
                        region_end,
                        arena_len: arena.len(),
                    });
                }
            }
        }

        if let Some(prev) = self.prev {
            let prev_next = (prev < offset)
                .then(|| Self::load(arena, prev))
                .transpose()?
                .and_then(|prev_header| prev_header.next);
            if prev_next != Some(offset) {
                return fault(IntegrityErrorKind::BrokenPrevLink { prev, prev_next });
            }
        }

        Ok(())
    }

    /// Produces a diagnostic snapshot of the header at `offset`.
    #[must_use]
    pub(crate) fn describe(&self, offset: usize, arena: &Arena) -> BlockInfo {
        BlockInfo {
            address: arena.base_addr() + offset,
            offset,
            size: self.size,
            free: self.free,
        }
    }
}
