//! A first-fit free-list heap over a caller-supplied memory arena.
//!
//! The host reserves one contiguous buffer and hands it to a
//! [`FreeListManager`], which then provides malloc/free-style allocation
//! out of it without touching the platform allocator. The manager never
//! allocates or frees the buffer itself.
//!
//! # Algorithm
//!
//! - **Block list**: every block of the arena, free or used, starts with a
//!   [`BlockHeader`] embedded in the arena. Headers form a doubly linked
//!   list ordered by address that tiles the arena without gaps.
//! - **Allocation**: first fit. The list is scanned from the lowest address
//!   for the first free block large enough; a sufficiently large leftover is
//!   split off as a new free block, smaller leftovers stay attached to the
//!   allocation. Allocated regions are zero-filled.
//! - **Deallocation**: the block is marked free and coalesced with a free
//!   successor, then with a free predecessor.
//! - **Concurrency**: one spin mutex per manager serializes every
//!   operation.
//!
//! ```text
//! ┌──────────┬────────────────┬──────────┬──────────────────────────────┐
//! │ header   │ used region    │ header   │ free region                  │
//! │ size: N  │ N bytes, zeroed│ size: M  │ M bytes                      │
//! └──────────┴────────────────┴──────────┴──────────────────────────────┘
//!            ▲
//!            └── pointer returned by `allocate(N)`
//! ```
//!
//! # Usage
//!
//! ```rust
//! use arena_heap::{FreeListManager, HEADER_SIZE};
//!
//! let mut buf = vec![0u8; 4096];
//! let heap = unsafe { FreeListManager::new(buf.as_mut_ptr(), buf.len()) }.unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0xab, 100) };
//!
//! heap.deallocate(ptr).unwrap();
//! heap.validate();
//!
//! let blocks = heap.describe_all();
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].size, 4096 - HEADER_SIZE);
//! # drop(heap);
//! # drop(buf);
//! ```
//!
//! # Errors
//!
//! Running out of a large enough free block is the ordinary failure mode
//! ([`AllocError::OutOfMemory`]). Invalid arguments are reported as errors
//! too. A corrupted block list is fatal: [`FreeListManager::validate`] and
//! any operation that reads a malformed header panic with a report of the
//! broken invariant.
//!
//! # Logging
//!
//! Operations emit records through the [`log`] facade: `trace` for every
//! allocation, split, merge and release, `debug` on construction and
//! `warn` for rejected requests. No logger is installed by this crate.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod arena;
pub mod config;
pub mod error;
mod free_list;
pub mod header;
mod manager;
pub mod report;

pub use self::{
    config::{HeapConfig, MINIMUM_FREE_BLOCK, MINIMUM_HEAP_SIZE},
    error::{AllocError, DeallocError, InitError, IntegrityError, IntegrityErrorKind},
    free_list::HeapStats,
    header::{BlockHeader, BlockInfo, HEADER_SIZE},
    manager::{FreeListManager, HeapDump},
};
