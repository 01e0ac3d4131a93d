//! Thread-safe heap over one arena.
//!
//! [`FreeListManager`] wraps a [`FreeList`] in a spin mutex. Every operation
//! holds that single lock for its whole body, so all calls from all threads
//! behave as if executed in one global order and the list invariants hold
//! whenever the lock is free.

use alloc::vec::Vec;
use core::{fmt, ptr::NonNull};

use log::{debug, trace, warn};
use snafu::{OptionExt as _, ResultExt as _, ensure};
use spin::mutex::SpinMutex;

use crate::{
    arena::Arena,
    config::HeapConfig,
    error::{
        AllocError, ArenaTooSmallSnafu, ConfigSnafu, DeallocError, DoubleFreeSnafu, InitError,
        IntegrityError, NullArenaSnafu, OutOfMemorySnafu, UnknownPointerSnafu, ZeroSizeSnafu,
    },
    free_list::{FreeList, HeapStats},
    header::BlockInfo,
    report,
};

/// A first-fit heap carving allocations out of a caller-supplied arena.
///
/// The manager owns the block list but never the arena bytes, which belong
/// to whoever constructed it and must outlive it.
///
/// # Examples
///
/// ```
/// use arena_heap::FreeListManager;
///
/// let buf: &'static mut [u8] = Box::leak(vec![0; 4096].into_boxed_slice());
/// let heap = FreeListManager::from_slice(buf).unwrap();
///
/// let ptr = heap.allocate(100).unwrap();
/// heap.deallocate(ptr).unwrap();
/// heap.validate();
/// assert_eq!(heap.describe_all().len(), 1);
/// ```
pub struct FreeListManager {
    list: SpinMutex<FreeList>,
    total_size: usize,
    config: HeapConfig,
}

impl fmt::Debug for FreeListManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeListManager")
            .field("total_size", &self.total_size)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FreeListManager {
    /// Creates a heap over `ptr..ptr + len` with the default configuration.
    ///
    /// # Safety
    ///
    /// See [`with_config`](Self::with_config).
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Result<Self, InitError> {
        unsafe { Self::with_config(ptr, len, HeapConfig::DEFAULT) }
    }

    /// Creates a heap over `ptr..ptr + len`.
    ///
    /// The whole arena becomes one free block. Fails if `ptr` is null, if
    /// `len` does not exceed `config.minimum_heap_size`, or if `config`
    /// itself is unusable.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr..ptr + len` is valid for reads and writes
    /// - the region is not accessed by anything else, except through
    ///   pointers returned by [`allocate`](Self::allocate)
    /// - the region remains valid for the lifetime of the manager
    pub unsafe fn with_config(
        ptr: *mut u8,
        len: usize,
        config: HeapConfig,
    ) -> Result<Self, InitError> {
        config.check().context(ConfigSnafu)?;
        let base = NonNull::new(ptr).context(NullArenaSnafu)?;
        ensure!(
            len > config.minimum_heap_size,
            ArenaTooSmallSnafu {
                len,
                minimum_heap_size: config.minimum_heap_size,
            }
        );

        let arena = unsafe { Arena::new(base, len) };
        let list = FreeList::new(arena, config);
        debug!("heap created: base={base:p}, len={len}, config={config:?}");

        Ok(Self {
            list: SpinMutex::new(list),
            total_size: len,
            config,
        })
    }

    /// Creates a heap over a buffer that lives for the rest of the program.
    pub fn from_slice(buf: &'static mut [u8]) -> Result<Self, InitError> {
        unsafe { Self::new(buf.as_mut_ptr(), buf.len()) }
    }

    /// Arena length supplied at construction.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Thresholds the heap was built with.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates `bytes` bytes from the first free block large enough.
    ///
    /// The returned region is zero-filled. Running out of suitable free
    /// blocks is reported as [`AllocError::OutOfMemory`] and leaves the heap
    /// unchanged.
    pub fn allocate(&self, bytes: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(bytes > 0, ZeroSizeSnafu);

        let mut list = self.list.lock();
        let Some(offset) = list.find_first_fit(bytes) else {
            let largest_free = list.stats().largest_free;
            warn!("allocate({bytes}) failed: largest_free={largest_free}");
            return OutOfMemorySnafu {
                requested: bytes,
                largest_free,
            }
            .fail();
        };

        let ptr = list.allocate_block(offset, bytes);
        trace!("allocate({bytes}) -> {ptr:p}");
        Ok(ptr)
    }

    /// Returns a block previously handed out by [`allocate`](Self::allocate)
    /// and coalesces it with free neighbours.
    ///
    /// The block is looked up by walking the list, so pointers that were
    /// never returned by this heap and blocks that are already free are
    /// rejected instead of corrupting it.
    pub fn deallocate(&self, ptr: NonNull<u8>) -> Result<(), DeallocError> {
        let address = ptr.addr().get();

        let mut list = self.list.lock();
        let offset = list.find_block(ptr).with_context(|| {
            warn!("deallocate({ptr:p}) rejected: unknown pointer");
            UnknownPointerSnafu { address }
        })?;
        if list.is_free(offset) {
            warn!("deallocate({ptr:p}) rejected: block is already free");
            return DoubleFreeSnafu { address }.fail();
        }

        let survivor = list.release(offset);
        trace!(
            "deallocate({ptr:p}) -> free block at {:p}",
            list.ptr_at(survivor)
        );
        Ok(())
    }

    /// Checks every invariant of the block list.
    ///
    /// # Panics
    ///
    /// Panics with a report of the broken invariant if the list is corrupted.
    pub fn validate(&self) {
        if let Err(err) = self.try_validate() {
            report::fatal(err);
        }
    }

    /// Checks every invariant of the block list, returning the usage summary
    /// gathered along the way.
    pub fn try_validate(&self) -> Result<HeapStats, IntegrityError> {
        self.list.lock().check()
    }

    /// Snapshots of all blocks in address order.
    #[must_use]
    pub fn describe_all(&self) -> Vec<BlockInfo> {
        self.list.lock().blocks().collect()
    }

    /// Renderable listing of all blocks.
    #[must_use]
    pub fn dump(&self) -> HeapDump {
        HeapDump {
            blocks: self.describe_all(),
        }
    }

    /// Usage summary of the current block list.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.list.lock().stats()
    }

    /// Usable size of the block starting at `ptr`, if `ptr` is a live
    /// allocation of this heap.
    ///
    /// May exceed the requested size when the leftover was too small to
    /// split off.
    #[must_use]
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let list = self.list.lock();
        let offset = list.find_block(ptr)?;
        list.blocks()
            .find(|block| block.offset == offset && !block.free)
            .map(|block| block.size)
    }
}

/// Listing of every block, one line each.
///
/// ```text
/// node[0] | address[0x5581a3c0] | size[100] | free[0]
/// node[1] | address[0x5581a448] | size[860] | free[1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDump {
    blocks: Vec<BlockInfo>,
}

impl HeapDump {
    #[must_use]
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }
}

impl fmt::Display for HeapDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "node[{i}] | {block}")?;
        }
        Ok(())
    }
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<FreeListManager>();
};

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use super::*;
    use crate::header::HEADER_SIZE;

    fn with_test_heap<F>(heap_size: usize, test_fn: F)
    where
        F: FnOnce(*mut u8, usize),
    {
        unsafe {
            let layout = Layout::from_size_align(heap_size, 16).unwrap();
            let heap_start = std::alloc::alloc(layout);
            heap_start.write_bytes(0x11, heap_size);
            test_fn(heap_start, heap_size);
            std::alloc::dealloc(heap_start, layout);
        }
    }

    fn with_test_manager<F>(heap_size: usize, test_fn: F)
    where
        F: FnOnce(&FreeListManager),
    {
        with_test_heap(heap_size, |heap_start, heap_size| {
            let heap = unsafe { FreeListManager::new(heap_start, heap_size) }.unwrap();
            test_fn(&heap);
            heap.validate();
        });
    }

    #[test]
    fn test_new_rejects_null() {
        let err = unsafe { FreeListManager::new(core::ptr::null_mut(), 4096) }.unwrap_err();
        assert!(err.is_null_arena());
    }

    #[test]
    fn test_new_rejects_small_arena() {
        with_test_heap(1024, |heap_start, heap_size| {
            let err = unsafe { FreeListManager::new(heap_start, heap_size) }.unwrap_err();
            assert!(matches!(
                err,
                InitError::ArenaTooSmall {
                    len: 1024,
                    minimum_heap_size: 1024,
                    ..
                }
            ));

            let config = HeapConfig::new().with_minimum_heap_size(512);
            let heap = unsafe { FreeListManager::with_config(heap_start, heap_size, config) };
            assert!(heap.is_ok());
        });
    }

    #[test]
    fn test_new_rejects_bad_config() {
        with_test_heap(2048, |heap_start, heap_size| {
            let config = HeapConfig::new().with_minimum_free_block(0);
            let err =
                unsafe { FreeListManager::with_config(heap_start, heap_size, config) }.unwrap_err();
            assert!(err.is_config());
        });
    }

    #[test]
    fn test_allocate_and_deallocate() {
        with_test_manager(2048, |heap| {
            let ptr = heap.allocate(100).unwrap();
            assert_eq!(heap.usable_size(ptr), Some(100));
            let blocks = heap.describe_all();
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0].region_start(), ptr.addr().get());

            heap.deallocate(ptr).unwrap();
            assert_eq!(heap.usable_size(ptr), None);
            let blocks = heap.describe_all();
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].size, 2048 - HEADER_SIZE);
            assert!(blocks[0].free);
        });
    }

    #[test]
    fn test_huge_split_threshold_never_splits() {
        with_test_heap(4096, |heap_start, heap_size| {
            let config = HeapConfig::new().with_minimum_free_block(usize::MAX);
            assert!(config.check().is_ok());
            let heap =
                unsafe { FreeListManager::with_config(heap_start, heap_size, config) }.unwrap();

            let ptr = heap.allocate(100).unwrap();
            assert_eq!(heap.usable_size(ptr), Some(4096 - HEADER_SIZE));
            assert_eq!(heap.describe_all().len(), 1);

            heap.deallocate(ptr).unwrap();
            heap.validate();
        });
    }

    #[test]
    fn test_zero_size_rejected() {
        with_test_manager(2048, |heap| {
            let err = heap.allocate(0).unwrap_err();
            assert!(err.is_zero_size());
        });
    }

    #[test]
    fn test_out_of_memory() {
        with_test_manager(2048, |heap| {
            let before = heap.describe_all();
            let err = heap.allocate(2048).unwrap_err();
            assert!(matches!(
                err,
                AllocError::OutOfMemory {
                    requested: 2048,
                    largest_free,
                    ..
                } if largest_free == 2048 - HEADER_SIZE
            ));
            assert_eq!(heap.describe_all(), before);
        });
    }

    #[test]
    fn test_double_free() {
        with_test_manager(2048, |heap| {
            let a = heap.allocate(64).unwrap();
            let _b = heap.allocate(64).unwrap();
            heap.deallocate(a).unwrap();
            let err = heap.deallocate(a).unwrap_err();
            assert!(err.is_double_free());
        });
    }

    #[test]
    fn test_unknown_pointer() {
        with_test_manager(2048, |heap| {
            let ptr = heap.allocate(64).unwrap();
            let err = heap.deallocate(unsafe { ptr.add(8) }).unwrap_err();
            assert!(err.is_unknown_pointer());

            let mut outside = 0_u8;
            let err = heap.deallocate(NonNull::from(&mut outside)).unwrap_err();
            assert!(err.is_unknown_pointer());

            heap.deallocate(ptr).unwrap();
        });
    }

    #[test]
    fn test_dump() {
        with_test_manager(2048, |heap| {
            heap.allocate(100).unwrap();
            let dump = heap.dump();
            assert_eq!(dump.blocks().len(), 2);
            let text = dump.to_string();
            let lines: Vec<_> = text.lines().collect();
            assert_eq!(lines.len(), 2);
            assert!(lines[0].starts_with("node[0] | address[0x"));
            assert!(lines[0].ends_with("| size[100] | free[0]"));
            assert!(lines[1].starts_with("node[1] | "));
            assert!(lines[1].ends_with("| free[1]"));
        });
    }

    #[test]
    fn test_stats_and_accessors() {
        with_test_manager(2048, |heap| {
            assert_eq!(heap.total_size(), 2048);
            assert_eq!(heap.config(), &HeapConfig::DEFAULT);

            heap.allocate(100).unwrap();
            let stats = heap.stats();
            assert_eq!(stats, heap.try_validate().unwrap());
            assert_eq!(stats.total_size, 2048);
            assert_eq!(stats.used_bytes, 100);
            assert_eq!(stats.free_blocks, 1);
        });
    }

    #[test]
    #[should_panic = "heap corruption detected"]
    fn test_validate_panics_on_corruption() {
        with_test_heap(2048, |heap_start, heap_size| {
            let heap = unsafe { FreeListManager::new(heap_start, heap_size) }.unwrap();
            let ptr = heap.allocate(64).unwrap();
            // scribble over the header of the block following the allocation
            unsafe { ptr.add(64 + 8).write_bytes(0xff, 8) };
            heap.validate();
        });
    }
}
