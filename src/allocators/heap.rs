//! Heap allocator - page-aligned zeroed blocks from the global allocator

use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    collections::HashMap,
    ptr::NonNull,
    sync::Mutex,
};

use super::traits::{DmaMapping, PhysAddr, PhysicalAllocator, PAGE_SIZE};
use crate::error::{ChanPoolError, Result};

/// Physical allocator for identity-mapped environments.
///
/// The bus address of every block is its CPU address. Suitable for
/// simulation and for platforms without an IOMMU where the process owns
/// physical memory directly.
#[derive(Debug)]
pub struct HeapAllocator {
    /// Upper bound on the bytes this allocator will hand out
    limit: usize,
    /// Live blocks keyed by address, holding the caller's size
    live: Mutex<HashMap<usize, usize>>,
}

impl HeapAllocator {
    /// Create an allocator that hands out at most `limit` bytes in total
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Configured byte limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, PAGE_SIZE).ok()
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new(256 * 1024 * 1024)
    }
}

impl PhysicalAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Option<DmaMapping> {
        if size == 0 {
            return None;
        }

        let layout = Self::layout(size)?;
        let mut live = self.live.lock().ok()?;

        let in_use: usize = live.values().sum();
        if in_use.checked_add(size)? > self.limit {
            log::debug!("heap allocator: {} bytes would exceed limit {}", size, self.limit);
            return None;
        }

        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        live.insert(ptr.as_ptr() as usize, size);

        Some(DmaMapping {
            kernel_address: ptr,
            physical_address: PhysAddr(ptr.as_ptr() as u64),
        })
    }

    fn free(
        &self,
        size: usize,
        kernel_address: NonNull<u8>,
        physical_address: PhysAddr,
    ) -> Result<()> {
        let addr = kernel_address.as_ptr() as usize;
        if physical_address.as_u64() != addr as u64 {
            return Err(ChanPoolError::free_failed(
                size,
                physical_address.as_u64(),
                "bus address does not match identity mapping",
            ));
        }

        let mut live = self.live.lock()?;
        match live.get(&addr) {
            Some(&recorded) if recorded == size => {}
            Some(&recorded) => {
                return Err(ChanPoolError::free_failed(
                    size,
                    physical_address.as_u64(),
                    format!("size mismatch, allocated with {} bytes", recorded),
                ))
            }
            None => {
                return Err(ChanPoolError::free_failed(
                    size,
                    physical_address.as_u64(),
                    "region is not allocated (double free?)",
                ))
            }
        }

        let layout = Self::layout(size)
            .ok_or_else(|| ChanPoolError::invalid_parameter("size", "invalid layout"))?;
        live.remove(&addr);
        // SAFETY: the block was allocated by us with this exact layout and is
        // removed from the live table before being returned.
        unsafe { dealloc(kernel_address.as_ptr(), layout) };

        Ok(())
    }

    fn bytes_in_use(&self) -> usize {
        self.live.lock().map(|live| live.values().sum()).unwrap_or(0)
    }

    fn live_allocations(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        let live = match self.live.get_mut() {
            Ok(live) => live,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !live.is_empty() {
            log::warn!("heap allocator dropped with {} live blocks", live.len());
        }
        for (addr, size) in live.drain() {
            if let Some(layout) = Self::layout(size) {
                // SAFETY: every live entry was produced by alloc_zeroed with this layout.
                unsafe { dealloc(addr as *mut u8, layout) };
            }
        }
    }
}
