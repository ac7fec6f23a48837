//! DMA buffer handle with in-band allocation state

use std::{ptr::NonNull, slice};

use crate::{
    allocators::{DmaMapping, PhysAddr, PhysicalAllocator},
    boundary::UserPtr,
    error::{ChanPoolError, Result},
};

/// Allocation outcome of a single buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Never allocated, or released
    Unallocated,
    /// Backed by physical memory
    Allocated(DmaMapping),
    /// The physical allocator could not satisfy the request
    Failed,
}

/// A physically contiguous, hardware-addressable buffer.
///
/// Buffers do not free themselves on drop. Release is an explicit step
/// driven by the owning [`BufferPool`](super::BufferPool), which pairs every
/// successful allocation with exactly one free.
#[derive(Debug)]
pub struct DmaBuffer {
    /// Requested size in bytes
    size: usize,
    state: BufferState,
    /// Caller-side mapping, filled in by a later mmap step
    user_mapping: Option<UserPtr>,
}

impl DmaBuffer {
    /// Descriptor for a buffer that has not been allocated yet
    pub fn unallocated(size: usize) -> Self {
        Self {
            size,
            state: BufferState::Unallocated,
            user_mapping: None,
        }
    }

    /// Ask `allocator` for `size` bytes, recording the outcome in-band
    pub fn allocate(allocator: &dyn PhysicalAllocator, size: usize) -> Self {
        let state = match allocator.allocate(size) {
            Some(mapping) => BufferState::Allocated(mapping),
            None => BufferState::Failed,
        };

        Self {
            size,
            state,
            user_mapping: None,
        }
    }

    /// Requested size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current allocation state
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the buffer holds physical memory
    pub fn is_allocated(&self) -> bool {
        matches!(self.state, BufferState::Allocated(_))
    }

    /// Whether the allocation attempt for this buffer failed
    pub fn is_failed(&self) -> bool {
        matches!(self.state, BufferState::Failed)
    }

    /// Both handles, when allocated
    pub fn mapping(&self) -> Option<DmaMapping> {
        match self.state {
            BufferState::Allocated(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// Owner-side address, `None` unless allocated
    pub fn kernel_address(&self) -> Option<NonNull<u8>> {
        self.mapping().map(|m| m.kernel_address)
    }

    /// Hardware-visible address, `None` unless allocated
    pub fn physical_address(&self) -> Option<PhysAddr> {
        self.mapping().map(|m| m.physical_address)
    }

    /// Caller-side mapping address, if one was recorded
    pub fn user_mapping(&self) -> Option<UserPtr> {
        self.user_mapping
    }

    /// Record the caller-side mapping established by the mmap step
    pub fn set_user_mapping(&mut self, address: UserPtr) -> Result<()> {
        if !self.is_allocated() {
            return Err(ChanPoolError::invalid_parameter(
                "user_mapping",
                "cannot map a buffer that holds no memory",
            ));
        }
        self.user_mapping = Some(address);
        Ok(())
    }

    /// Buffer contents, when allocated
    pub fn as_slice(&self) -> Option<&[u8]> {
        let mapping = self.mapping()?;
        // SAFETY: the allocator handed out at least `size` bytes at this
        // address and they stay valid until `release`.
        Some(unsafe { slice::from_raw_parts(mapping.kernel_address.as_ptr(), self.size) })
    }

    /// Mutable buffer contents, when allocated
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        let mapping = self.mapping()?;
        // SAFETY: as for `as_slice`; `&mut self` guarantees exclusivity.
        Some(unsafe { slice::from_raw_parts_mut(mapping.kernel_address.as_ptr(), self.size) })
    }

    /// Write data into the buffer at `offset`
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let size = self.size;
        let dest = self
            .as_mut_slice()
            .ok_or_else(|| ChanPoolError::memory("buffer is not allocated"))?;

        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= size)
            .ok_or_else(|| ChanPoolError::invalid_parameter("offset", "write past end of buffer"))?;

        dest[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Return the memory to `allocator` and reset to `Unallocated`.
    ///
    /// Returns `None` when there was nothing to free, otherwise the result of
    /// the free primitive. The buffer is reset either way so it can never be
    /// freed twice.
    pub(crate) fn release(&mut self, allocator: &dyn PhysicalAllocator) -> Option<Result<()>> {
        let mapping = self.mapping();
        self.state = BufferState::Unallocated;
        self.user_mapping = None;

        let mapping = mapping?;
        Some(allocator.free(self.size, mapping.kernel_address, mapping.physical_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::HeapAllocator;

    #[test]
    fn test_allocated_buffer_exposes_both_addresses() {
        let heap = HeapAllocator::default();
        let mut buffer = DmaBuffer::allocate(&heap, 4096);

        assert!(buffer.is_allocated());
        assert!(buffer.kernel_address().is_some());
        assert!(buffer.physical_address().is_some());
        assert_eq!(buffer.as_slice().unwrap().len(), 4096);

        buffer.write(10, b"sg").unwrap();
        assert_eq!(&buffer.as_slice().unwrap()[10..12], b"sg");
        assert!(buffer.write(4095, b"xx").is_err());

        assert!(matches!(buffer.release(&heap), Some(Ok(()))));
        assert_eq!(buffer.state(), BufferState::Unallocated);
        assert!(buffer.kernel_address().is_none());
        assert!(buffer.release(&heap).is_none());
    }

    #[test]
    fn test_failed_buffer_has_no_addresses() {
        let heap = HeapAllocator::new(1024);
        let mut buffer = DmaBuffer::allocate(&heap, 4096);

        assert!(buffer.is_failed());
        assert!(buffer.kernel_address().is_none());
        assert!(buffer.physical_address().is_none());
        assert!(buffer.as_slice().is_none());
        assert!(buffer.set_user_mapping(UserPtr(0x1000)).is_err());
        assert!(buffer.release(&heap).is_none());
    }

    #[test]
    fn test_user_mapping_cleared_on_release() {
        let heap = HeapAllocator::default();
        let mut buffer = DmaBuffer::allocate(&heap, 4096);
        buffer.set_user_mapping(UserPtr(0x7000_0000)).unwrap();
        assert_eq!(buffer.user_mapping(), Some(UserPtr(0x7000_0000)));

        buffer.release(&heap);
        assert_eq!(buffer.user_mapping(), None);
    }
}
