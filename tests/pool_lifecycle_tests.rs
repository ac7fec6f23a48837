//! Integration tests for the buffer pool allocate/release lifecycle

use std::{
    collections::HashSet,
    mem::size_of,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chanpool::{
    allocators::{DmaMapping, HeapAllocator, PhysAddr, PhysicalAllocator},
    buffers::{BufferPool, BufferState, SgDescriptor},
    config::PoolConfig,
    error::{ChanPoolError, Result},
    request::AllocRequest,
};

/// Heap-backed allocator that records every call and fails on demand
#[derive(Debug, Default)]
struct RecordingAllocator {
    inner: HeapAllocator,
    /// Zero-based allocate call numbers that return no memory
    fail_calls: Mutex<HashSet<usize>>,
    fail_frees: AtomicBool,
    allocs: Mutex<Vec<(usize, Option<(usize, u64)>)>>,
    frees: Mutex<Vec<(usize, usize, u64)>>,
}

impl RecordingAllocator {
    fn failing_on(calls: &[usize]) -> Self {
        let allocator = Self::default();
        allocator.fail_calls.lock().unwrap().extend(calls.iter().copied());
        allocator
    }

    fn alloc_calls(&self) -> usize {
        self.allocs.lock().unwrap().len()
    }

    fn free_calls(&self) -> usize {
        self.frees.lock().unwrap().len()
    }

    fn total_calls(&self) -> usize {
        self.alloc_calls() + self.free_calls()
    }

    /// Every successful allocation paired with exactly one free of the same triple
    fn assert_paired(&self) {
        let mut allocated: Vec<(usize, usize, u64)> = self
            .allocs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|&(size, mapping)| mapping.map(|(addr, phys)| (size, addr, phys)))
            .collect();
        let mut freed = self.frees.lock().unwrap().clone();
        allocated.sort();
        freed.sort();
        assert_eq!(allocated, freed);
    }
}

impl PhysicalAllocator for RecordingAllocator {
    fn allocate(&self, size: usize) -> Option<DmaMapping> {
        let mut allocs = self.allocs.lock().unwrap();
        let call = allocs.len();
        let mapping = if self.fail_calls.lock().unwrap().contains(&call) {
            None
        } else {
            self.inner.allocate(size)
        };
        allocs.push((
            size,
            mapping.map(|m| (m.kernel_address.as_ptr() as usize, m.physical_address.as_u64())),
        ));
        mapping
    }

    fn free(&self, size: usize, kernel_address: NonNull<u8>, physical_address: PhysAddr) -> Result<()> {
        self.frees.lock().unwrap().push((
            size,
            kernel_address.as_ptr() as usize,
            physical_address.as_u64(),
        ));
        self.inner.free(size, kernel_address, physical_address)?;
        if self.fail_frees.load(Ordering::SeqCst) {
            return Err(ChanPoolError::free_failed(size, physical_address.as_u64(), "injected"));
        }
        Ok(())
    }

    fn bytes_in_use(&self) -> usize {
        self.inner.bytes_in_use()
    }

    fn live_allocations(&self) -> usize {
        self.inner.live_allocations()
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pool_with(allocator: Arc<RecordingAllocator>) -> BufferPool {
    init_logging();
    BufferPool::new(PoolConfig::new("lifecycle"), allocator).unwrap()
}

#[cfg(test)]
mod pool_lifecycle_tests {
    use super::*;

    #[test]
    fn test_three_buffer_scenario() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());

        let summary = pool.allocate(&AllocRequest::new(vec![4096, 8192, 4096])).unwrap();
        assert!(summary.is_complete());
        assert_eq!(pool.buffer_count(), 3);

        let sizes: Vec<usize> = pool.buffers().iter().map(|b| b.size()).collect();
        assert_eq!(sizes, vec![4096, 8192, 4096]);
        assert!(pool.buffers().iter().all(|b| b.is_allocated()));
        assert_eq!(
            pool.descriptor_table_buffer().unwrap().size(),
            3 * size_of::<SgDescriptor>()
        );
        assert_eq!(allocator.alloc_calls(), 4);

        let released = pool.release();
        assert_eq!(released.freed, 4);
        assert_eq!(pool.buffer_count(), 0);
        assert!(pool.is_empty());
        allocator.assert_paired();
    }

    #[test]
    fn test_allocate_on_allocated_pool_changes_nothing() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());
        pool.allocate(&AllocRequest::new(vec![4096, 4096])).unwrap();

        let before: Vec<BufferState> = pool.buffers().iter().map(|b| b.state()).collect();
        let table_before = pool.descriptor_table().unwrap().physical_base();
        let calls_before = allocator.total_calls();

        for sizes in [vec![4096], vec![8192; 5], Vec::new()] {
            let err = pool.allocate(&AllocRequest::new(sizes)).unwrap_err();
            assert!(matches!(err, ChanPoolError::AlreadyAllocated { buffer_count: 2 }));
            assert_eq!(err.errno(), -libc::EBUSY);
        }

        let after: Vec<BufferState> = pool.buffers().iter().map(|b| b.state()).collect();
        assert_eq!(before, after);
        assert_eq!(pool.descriptor_table().unwrap().physical_base(), table_before);
        assert_eq!(pool.buffer_count(), 2);
        assert_eq!(allocator.total_calls(), calls_before);

        pool.release();
        allocator.assert_paired();
    }

    #[test]
    fn test_release_on_empty_pool_is_noop() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());

        for _ in 0..3 {
            let summary = pool.release();
            assert_eq!(summary.freed, 0);
            assert_eq!(summary.skipped, 0);
            assert!(pool.is_empty());
        }
        assert_eq!(allocator.total_calls(), 0);
        assert_eq!(pool.stats().empty_releases, 3);

        // Second release after a real one is also a no-op
        pool.allocate(&AllocRequest::new(vec![4096])).unwrap();
        pool.release();
        let calls = allocator.total_calls();
        pool.release();
        assert_eq!(allocator.total_calls(), calls);
    }

    #[test]
    fn test_round_trip_for_many_shapes() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());

        let shapes: Vec<Vec<usize>> = vec![
            vec![],
            vec![1],
            vec![4096],
            vec![100, 5000, 4096, 12288],
            (1..=32).map(|i| i * 512).collect(),
        ];

        for sizes in shapes {
            let n = sizes.len();
            pool.allocate(&AllocRequest::new(sizes)).unwrap();
            assert_eq!(pool.buffer_count(), n);
            assert_eq!(pool.is_allocated(), n > 0);

            pool.release();
            assert!(pool.is_empty());
            assert_eq!(pool.buffer_count(), 0);
            assert!(pool.buffers().is_empty());
            assert!(pool.descriptor_table().is_none());
            assert!(pool.descriptor_table_buffer().is_none());
            assert_eq!(allocator.live_allocations(), 0);
        }

        allocator.assert_paired();
        assert!(pool.stats().is_balanced());
    }

    #[test]
    fn test_partial_failure_is_tolerated() {
        // Calls 0..=3 are the buffers, call 4 is the descriptor table
        let allocator = Arc::new(RecordingAllocator::failing_on(&[1]));
        let mut pool = pool_with(allocator.clone());

        let summary = pool.allocate(&AllocRequest::new(vec![4096; 4])).unwrap();
        assert_eq!(summary.allocated, 3);
        assert_eq!(summary.failed, 1);
        assert!(summary.table_ready);
        assert!(!summary.is_complete());

        let failed = pool.buffer(1).unwrap();
        assert!(failed.is_failed());
        assert!(failed.kernel_address().is_none());
        for i in [0, 2, 3] {
            let buffer = pool.buffer(i).unwrap();
            assert!(buffer.is_allocated());
            assert!(buffer.as_slice().unwrap().iter().all(|&b| b == 0));
        }

        let released = pool.release();
        assert_eq!(released.freed, 4);
        assert_eq!(released.skipped, 1);
        assert!(released.is_clean());
        assert_eq!(allocator.free_calls(), 4);
        allocator.assert_paired();
    }

    #[test]
    fn test_every_buffer_failing_still_succeeds() {
        let allocator = Arc::new(RecordingAllocator::failing_on(&[0, 1, 2]));
        let mut pool = pool_with(allocator.clone());

        let summary = pool.allocate(&AllocRequest::new(vec![4096; 3])).unwrap();
        assert_eq!(summary.allocated, 0);
        assert_eq!(summary.failed, 3);
        assert!(pool.is_allocated());

        // Slots exist but point nowhere
        let table = pool.descriptor_table().unwrap();
        assert!(table.slots().iter().all(|s| s.buffer() == PhysAddr(0) && s.transfer_len() == 0));

        let released = pool.release();
        assert_eq!(released.freed, 1);
        assert_eq!(released.skipped, 3);
        allocator.assert_paired();
    }

    #[test]
    fn test_descriptor_table_failure_keeps_buffers() {
        let allocator = Arc::new(RecordingAllocator::failing_on(&[2]));
        let mut pool = pool_with(allocator.clone());

        let summary = pool.allocate(&AllocRequest::new(vec![4096, 4096])).unwrap();
        assert_eq!(summary.allocated, 2);
        assert!(!summary.table_ready);
        assert!(pool.is_allocated());
        assert!(pool.descriptor_table().is_none());
        assert!(pool.descriptor_table_buffer().unwrap().is_failed());
        assert_eq!(pool.stats().table_failures, 1);

        // The failed table buffer is never handed to free
        let released = pool.release();
        assert_eq!(released.freed, 2);
        assert_eq!(released.skipped, 1);
        allocator.assert_paired();
    }

    #[test]
    fn test_descriptor_table_matches_buffer_order() {
        let allocator = Arc::new(RecordingAllocator::failing_on(&[3]));
        let mut pool = pool_with(allocator.clone());
        let sizes = vec![4096, 100, 65536, 8192, 12288];

        pool.allocate(&AllocRequest::new(sizes.clone())).unwrap();
        let table = pool.descriptor_table().unwrap();
        assert_eq!(table.len(), sizes.len());

        for (i, (slot, buffer)) in table.slots().iter().zip(pool.buffers()).enumerate() {
            match buffer.physical_address() {
                Some(phys) => {
                    assert_eq!(slot.buffer(), phys);
                    assert_eq!(slot.transfer_len(), sizes[i]);
                    assert_eq!(
                        slot.control & (SgDescriptor::CONTROL_SOF | SgDescriptor::CONTROL_EOF),
                        SgDescriptor::CONTROL_SOF | SgDescriptor::CONTROL_EOF
                    );
                }
                None => {
                    assert_eq!(i, 3);
                    assert_eq!(slot.control, 0);
                }
            }
            assert_eq!(Some(slot.next()), table.slot_address((i + 1) % sizes.len()));
            assert!(!slot.is_complete());
        }

        pool.release();
        allocator.assert_paired();
    }

    #[test]
    fn test_free_errors_are_counted_and_release_completes() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());
        pool.allocate(&AllocRequest::new(vec![4096, 8192])).unwrap();

        allocator.fail_frees.store(true, Ordering::SeqCst);
        let released = pool.release();

        assert_eq!(released.freed, 0);
        assert_eq!(released.free_failures, 3);
        assert!(!released.is_clean());
        assert!(pool.is_empty());
        assert_eq!(pool.stats().free_failures, 3);
        assert!(!pool.stats().is_balanced());

        // Each region was still offered exactly once
        assert_eq!(allocator.free_calls(), 3);
        allocator.assert_paired();

        allocator.fail_frees.store(false, Ordering::SeqCst);
        assert!(pool.allocate(&AllocRequest::new(vec![4096])).is_ok());
    }

    #[test]
    fn test_zero_sized_entry_is_a_per_buffer_failure() {
        let allocator = Arc::new(RecordingAllocator::default());
        let mut pool = pool_with(allocator.clone());

        let summary = pool.allocate(&AllocRequest::new(vec![0, 4096])).unwrap();
        assert_eq!(summary.failed, 1);
        assert!(pool.buffer(0).unwrap().is_failed());
        assert!(pool.buffer(1).unwrap().is_allocated());

        pool.release();
        allocator.assert_paired();
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let allocator = Arc::new(RecordingAllocator::failing_on(&[0]));
        let mut pool = pool_with(allocator);

        pool.allocate(&AllocRequest::new(vec![4096, 4096])).unwrap();
        assert_eq!(pool.stats().bytes_in_use, 4096 + 2 * size_of::<SgDescriptor>());
        let _ = pool.allocate(&AllocRequest::new(vec![4096]));
        pool.release();
        pool.release();

        let stats = pool.stats();
        assert_eq!(stats.allocate_calls, 2);
        assert_eq!(stats.busy_rejections, 1);
        assert_eq!(stats.buffers_allocated, 1);
        assert_eq!(stats.buffer_failures, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.empty_releases, 1);
        assert_eq!(stats.frees_issued, 2);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.success_rate(), 0.5);
    }
}
