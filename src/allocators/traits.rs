//! Physical allocator trait definition

use std::{fmt, ptr::NonNull};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Granularity of physically contiguous allocations
pub const PAGE_SIZE: usize = 4096;

/// Align a value up to the given power-of-two alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Device-visible (bus) address of a DMA region
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Raw address value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Address `offset` bytes past this one
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Low 32 bits, as split into descriptor address words
    pub const fn low(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits, as split into descriptor address words
    pub const fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Both handles of a successfully allocated region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMapping {
    /// Owner-side access pointer
    pub kernel_address: NonNull<u8>,
    /// Hardware-visible handle
    pub physical_address: PhysAddr,
}

// The mapping is a pair of handles; access to the memory behind it is
// governed by whoever owns the buffer carrying it.
unsafe impl Send for DmaMapping {}
unsafe impl Sync for DmaMapping {}

/// Source of physically contiguous, hardware-addressable memory
pub trait PhysicalAllocator: Send + Sync + fmt::Debug {
    /// Allocate `size` zeroed bytes.
    ///
    /// Failure is reported in-band as `None`, never as an error.
    fn allocate(&self, size: usize) -> Option<DmaMapping>;

    /// Release a region previously returned by [`allocate`](Self::allocate).
    ///
    /// `size`, `kernel_address` and `physical_address` must be exactly the
    /// values recorded at allocation time.
    fn free(&self, size: usize, kernel_address: NonNull<u8>, physical_address: PhysAddr)
        -> Result<()>;

    /// Bytes currently handed out
    fn bytes_in_use(&self) -> usize;

    /// Number of live allocations
    fn live_allocations(&self) -> usize;

    /// Get allocator type name for debugging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
