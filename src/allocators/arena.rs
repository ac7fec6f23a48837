//! Arena allocator - first-fit contiguous ranges carved out of one DMA region

use std::{collections::BTreeMap, ptr::NonNull, sync::Mutex};

use super::traits::{align_up, DmaMapping, PhysAddr, PhysicalAllocator, PAGE_SIZE};
use crate::{
    error::{ChanPoolError, Result},
    memory::{DmaRegion, RegionConfig},
};

/// A free range of the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    offset: usize,
    len: usize,
}

/// A handed-out range: the caller's size and the page-rounded reservation
#[derive(Debug, Clone, Copy)]
struct LiveRange {
    size: usize,
    reserved: usize,
}

#[derive(Debug)]
struct ArenaState {
    /// Free extents, sorted by offset and never adjacent
    free: Vec<Extent>,
    /// Live allocations keyed by offset
    live: BTreeMap<usize, LiveRange>,
    bytes_in_use: usize,
}

/// Physical allocator over a single contiguous [`DmaRegion`].
///
/// Every allocation is page aligned and physically contiguous. Freed ranges
/// are coalesced with their neighbours, so a full allocate/free cycle always
/// returns the arena to a single free extent.
#[derive(Debug)]
pub struct ArenaAllocator {
    region: DmaRegion,
    state: Mutex<ArenaState>,
}

impl ArenaAllocator {
    /// Map a region and manage it as one free extent
    pub fn new(config: RegionConfig) -> Result<Self> {
        Ok(Self::from_region(DmaRegion::new(config)?))
    }

    /// Manage an already mapped region
    pub fn from_region(region: DmaRegion) -> Self {
        let state = ArenaState {
            free: vec![Extent {
                offset: 0,
                len: region.size(),
            }],
            live: BTreeMap::new(),
            bytes_in_use: 0,
        };

        Self {
            region,
            state: Mutex::new(state),
        }
    }

    /// The region this allocator carves from
    pub fn region(&self) -> &DmaRegion {
        &self.region
    }

    /// Bytes not reserved by any live allocation
    pub fn free_bytes(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.free.iter().map(|e| e.len).sum())
            .unwrap_or(0)
    }

    /// Number of disjoint free extents
    pub fn free_extents(&self) -> usize {
        self.state.lock().map(|state| state.free.len()).unwrap_or(0)
    }

    /// Largest contiguous allocation currently possible
    pub fn largest_free_extent(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.free.iter().map(|e| e.len).max().unwrap_or(0))
            .unwrap_or(0)
    }

    fn release_extent(free: &mut Vec<Extent>, extent: Extent) {
        let idx = free.partition_point(|e| e.offset < extent.offset);
        free.insert(idx, extent);

        // Merge with the following extent
        if idx + 1 < free.len() && free[idx].offset + free[idx].len == free[idx + 1].offset {
            free[idx].len += free[idx + 1].len;
            free.remove(idx + 1);
        }

        // Merge with the preceding extent
        if idx > 0 && free[idx - 1].offset + free[idx - 1].len == free[idx].offset {
            free[idx - 1].len += free[idx].len;
            free.remove(idx);
        }
    }
}

impl PhysicalAllocator for ArenaAllocator {
    fn allocate(&self, size: usize) -> Option<DmaMapping> {
        if size == 0 || size > self.region.size() {
            log::debug!("arena '{}': cannot satisfy {} bytes", self.region.name(), size);
            return None;
        }

        let reserved = align_up(size, PAGE_SIZE);

        let offset = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("arena '{}': {}", self.region.name(), e);
                    return None;
                }
            };

            let idx = state.free.iter().position(|e| e.len >= reserved)?;
            let extent = state.free[idx];
            if extent.len == reserved {
                state.free.remove(idx);
            } else {
                state.free[idx] = Extent {
                    offset: extent.offset + reserved,
                    len: extent.len - reserved,
                };
            }

            state.live.insert(extent.offset, LiveRange { size, reserved });
            state.bytes_in_use += reserved;
            extent.offset
        };

        let kernel_address = self.region.cpu_at(offset)?;
        // SAFETY: [offset, offset + reserved) lies inside the region and was
        // just removed from the free list, so nothing else references it.
        unsafe {
            std::ptr::write_bytes(kernel_address.as_ptr(), 0, reserved);
        }

        Some(DmaMapping {
            kernel_address,
            physical_address: PhysAddr(self.region.bus_at(offset)),
        })
    }

    fn free(
        &self,
        size: usize,
        kernel_address: NonNull<u8>,
        physical_address: PhysAddr,
    ) -> Result<()> {
        let offset = self.region.offset_of(kernel_address).ok_or_else(|| {
            ChanPoolError::free_failed(size, physical_address.as_u64(), "address outside arena")
        })?;

        if self.region.bus_at(offset) != physical_address.as_u64() {
            return Err(ChanPoolError::free_failed(
                size,
                physical_address.as_u64(),
                format!(
                    "bus address does not match owner address (expected {:#x})",
                    self.region.bus_at(offset)
                ),
            ));
        }

        let mut state = self.state.lock()?;

        let range = match state.live.get(&offset) {
            Some(range) => *range,
            None => {
                return Err(ChanPoolError::free_failed(
                    size,
                    physical_address.as_u64(),
                    "region is not allocated (double free?)",
                ))
            }
        };

        if range.size != size {
            return Err(ChanPoolError::free_failed(
                size,
                physical_address.as_u64(),
                format!("size mismatch, allocated with {} bytes", range.size),
            ));
        }

        state.live.remove(&offset);
        state.bytes_in_use -= range.reserved;
        Self::release_extent(
            &mut state.free,
            Extent {
                offset,
                len: range.reserved,
            },
        );

        Ok(())
    }

    fn bytes_in_use(&self) -> usize {
        self.state.lock().map(|state| state.bytes_in_use).unwrap_or(0)
    }

    fn live_allocations(&self) -> usize {
        self.state.lock().map(|state| state.live.len()).unwrap_or(0)
    }
}
