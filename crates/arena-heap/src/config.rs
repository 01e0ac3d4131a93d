//! Tunable thresholds of the heap.
//!
//! A [`HeapConfig`] is fixed at construction time and never changes for the
//! lifetime of a [`FreeListManager`](crate::FreeListManager).

use snafu::{Snafu, ensure};

use crate::header::HEADER_SIZE;

/// Arenas must be strictly larger than this many bytes.
pub const MINIMUM_HEAP_SIZE: usize = 1024;

/// Smallest usable size a split-off free block may have.
///
/// A block is split only when the leftover after a request can host a new
/// header plus this many usable bytes, i.e. when
/// `size - bytes >= HEADER_SIZE + MINIMUM_FREE_BLOCK`. Smaller leftovers
/// stay attached to the allocated block as internal fragmentation.
pub const MINIMUM_FREE_BLOCK: usize = 32;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("minimum free block size must be greater than zero"))]
    ZeroFreeBlock,
    #[snafu(display(
        "minimum heap size cannot hold a block: minimum_heap_size={minimum_heap_size}, \
         header_size={header_size}"
    ))]
    HeapSizeBelowHeader {
        minimum_heap_size: usize,
        header_size: usize,
    },
}

/// Thresholds controlling construction and block splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapConfig {
    /// Arenas of this length or shorter are rejected.
    pub minimum_heap_size: usize,
    /// Split threshold, see [`MINIMUM_FREE_BLOCK`].
    pub minimum_free_block: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl HeapConfig {
    /// [`MINIMUM_HEAP_SIZE`] and [`MINIMUM_FREE_BLOCK`].
    pub const DEFAULT: Self = Self::new();

    #[must_use]
    pub const fn new() -> Self {
        Self {
            minimum_heap_size: MINIMUM_HEAP_SIZE,
            minimum_free_block: MINIMUM_FREE_BLOCK,
        }
    }

    #[must_use]
    pub const fn with_minimum_heap_size(mut self, minimum_heap_size: usize) -> Self {
        self.minimum_heap_size = minimum_heap_size;
        self
    }

    #[must_use]
    pub const fn with_minimum_free_block(mut self, minimum_free_block: usize) -> Self {
        self.minimum_free_block = minimum_free_block;
        self
    }

    /// Checks that the configuration can describe a usable heap.
    ///
    /// The construction threshold has to leave room for at least one header
    /// followed by one payload byte, and split-off blocks must never be
    /// empty.
    pub fn check(&self) -> Result<(), ConfigError> {
        ensure!(self.minimum_free_block > 0, ZeroFreeBlockSnafu);
        ensure!(
            self.minimum_heap_size > HEADER_SIZE,
            HeapSizeBelowHeaderSnafu {
                minimum_heap_size: self.minimum_heap_size,
                header_size: HEADER_SIZE,
            }
        );
        Ok(())
    }
}
