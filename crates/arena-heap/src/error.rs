//! Error types of the heap.
//!
//! Recoverable failures are returned as [`InitError`], [`AllocError`] and
//! [`DeallocError`]. A broken block list is reported as [`IntegrityError`],
//! which the heap treats as fatal.

use snafu::{IntoError as _, Location, Snafu};

use crate::config::ConfigError;

/// Errors returned while setting up a heap over an arena.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("arena pointer is null"))]
    NullArena {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena is too small: len={len}, minimum_heap_size={minimum_heap_size}"))]
    ArenaTooSmall {
        len: usize,
        minimum_heap_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid heap configuration"))]
    Config {
        #[snafu(source)]
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors returned by [`FreeListManager::allocate`](crate::FreeListManager::allocate).
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("zero-byte allocation requested"))]
    ZeroSize {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no free block large enough: requested={requested}, largest_free={largest_free}"))]
    OutOfMemory {
        requested: usize,
        largest_free: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors returned by [`FreeListManager::deallocate`](crate::FreeListManager::deallocate).
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum DeallocError {
    #[snafu(display("pointer was not returned by this heap: address={address:#x}"))]
    UnknownPointer {
        address: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block is already free: address={address:#x}"))]
    DoubleFree {
        address: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// The ways a block list can be found broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[non_exhaustive]
pub enum IntegrityErrorKind {
    #[display("header magic tag is corrupted: magic={magic:#x}")]
    BadMagic { magic: u32 },
    #[display("header state tag is corrupted: state={state:#x}")]
    BadState { state: u32 },
    #[display("block size is zero")]
    ZeroSize,
    #[display("block overruns the arena: region_end={region_end:#x}, arena_len={arena_len:#x}")]
    OutOfBounds { region_end: usize, arena_len: usize },
    #[display("next block does not link back: next={next:#x}, next_prev={next_prev:x?}")]
    BrokenNextLink {
        next: usize,
        next_prev: Option<usize>,
    },
    #[display("previous block does not link forward: prev={prev:#x}, prev_next={prev_next:x?}")]
    BrokenPrevLink {
        prev: usize,
        prev_next: Option<usize>,
    },
    #[display("unexpected previous link: found={found:x?}, expected={expected:x?}")]
    UnexpectedPrev {
        found: Option<usize>,
        expected: Option<usize>,
    },
    #[display("gap or overlap before next header: region_end={region_end:#x}, next={next:#x}")]
    NotContiguous { region_end: usize, next: usize },
    #[display("tail block does not reach the arena end: region_end={region_end:#x}, arena_len={arena_len:#x}")]
    ShortTail { region_end: usize, arena_len: usize },
    #[display("accounted bytes do not match the arena size: accounted={accounted}, total={total}")]
    Conservation { accounted: usize, total: usize },
}

/// A broken invariant of the block list, with the offset of the header it
/// was detected at.
#[derive(Debug, Snafu)]
#[snafu(display("heap integrity fault at offset {offset:#x} (detected at {location})"))]
pub struct IntegrityError {
    offset: usize,
    #[snafu(source)]
    kind: IntegrityErrorKind,
    #[snafu(implicit)]
    location: Location,
}

impl IntegrityError {
    #[track_caller]
    pub(crate) fn new(offset: usize, kind: IntegrityErrorKind) -> Self {
        IntegritySnafu { offset }.into_error(kind)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn kind(&self) -> IntegrityErrorKind {
        self.kind
    }
}
