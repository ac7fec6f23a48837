//! Scatter/gather descriptor records and the table view over them

use std::{fmt, mem::size_of, ptr::NonNull, slice};

use super::buffer::DmaBuffer;
use crate::allocators::PhysAddr;

/// One hardware scatter/gather descriptor (AXI DMA layout).
///
/// Records are 64-byte aligned and chained through `next_desc`.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SgDescriptor {
    pub next_desc: u32,
    pub next_desc_msb: u32,
    pub buffer_address: u32,
    pub buffer_address_msb: u32,
    pub reserved: [u32; 2],
    pub control: u32,
    pub status: u32,
    pub app: [u32; 5],
    _pad: [u32; 3],
}

impl SgDescriptor {
    /// Width of the transfer length field in `control`
    pub const LENGTH_BITS: u32 = 23;
    /// Largest transfer a single descriptor can describe
    pub const MAX_TRANSFER_LEN: usize = (1 << Self::LENGTH_BITS) - 1;
    /// Start-of-frame flag in `control`
    pub const CONTROL_SOF: u32 = 1 << 27;
    /// End-of-frame flag in `control`
    pub const CONTROL_EOF: u32 = 1 << 26;
    /// Set by the engine when the descriptor completes
    pub const STATUS_COMPLETE: u32 = 1 << 31;

    /// Next-descriptor pointer as one address
    pub fn next(&self) -> PhysAddr {
        PhysAddr(((self.next_desc_msb as u64) << 32) | self.next_desc as u64)
    }

    /// Buffer pointer as one address
    pub fn buffer(&self) -> PhysAddr {
        PhysAddr(((self.buffer_address_msb as u64) << 32) | self.buffer_address as u64)
    }

    /// Transfer length programmed in `control`
    pub fn transfer_len(&self) -> usize {
        (self.control & Self::MAX_TRANSFER_LEN as u32) as usize
    }

    /// Whether the engine marked this descriptor complete
    pub fn is_complete(&self) -> bool {
        self.status & Self::STATUS_COMPLETE != 0
    }

    fn set_next(&mut self, next: PhysAddr) {
        self.next_desc = next.low();
        self.next_desc_msb = next.high();
    }

    fn set_buffer(&mut self, buffer: PhysAddr, len: usize) {
        self.buffer_address = buffer.low();
        self.buffer_address_msb = buffer.high();
        self.control = Self::CONTROL_SOF | Self::CONTROL_EOF | (len.min(Self::MAX_TRANSFER_LEN) as u32);
    }
}

/// Typed view over the descriptor-table buffer: one slot per pool buffer,
/// in pool order.
///
/// The view borrows memory owned by the pool's table buffer; the pool drops
/// the view before it frees that buffer.
pub struct DescriptorTable {
    base: NonNull<SgDescriptor>,
    physical_base: PhysAddr,
    len: usize,
}

impl DescriptorTable {
    /// Establish a view of `len` slots over `buffer`.
    ///
    /// Returns `None` when the buffer holds no memory, is too small, or is
    /// not aligned to `alignment`.
    pub fn over(buffer: &DmaBuffer, len: usize, alignment: usize) -> Option<Self> {
        let mapping = buffer.mapping()?;

        if len == 0 || buffer.size() < len.checked_mul(size_of::<SgDescriptor>())? {
            return None;
        }

        let align = alignment.max(std::mem::align_of::<SgDescriptor>());
        if mapping.kernel_address.as_ptr() as usize % align != 0
            || mapping.physical_address.as_u64() % align as u64 != 0
        {
            return None;
        }

        Some(Self {
            base: mapping.kernel_address.cast::<SgDescriptor>(),
            physical_base: mapping.physical_address,
            len,
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus address of the table (what the engine's current-descriptor register takes)
    pub fn physical_base(&self) -> PhysAddr {
        self.physical_base
    }

    /// Bus address of slot `index`
    pub fn slot_address(&self, index: usize) -> Option<PhysAddr> {
        (index < self.len).then(|| self.physical_base.offset((index * size_of::<SgDescriptor>()) as u64))
    }

    /// All slots
    pub fn slots(&self) -> &[SgDescriptor] {
        // SAFETY: `over` checked size and alignment; the table buffer outlives the view.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    /// All slots, mutably
    pub fn slots_mut(&mut self) -> &mut [SgDescriptor] {
        // SAFETY: as for `slots`; `&mut self` guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }

    /// Prepare every slot for `buffers`.
    ///
    /// Slots form a ring through `next_desc`. A slot whose buffer holds
    /// memory gets that buffer's address and length; slots of failed
    /// buffers keep a zero buffer pointer and length.
    pub fn chain(&mut self, buffers: &[DmaBuffer]) {
        let (base, len) = (self.physical_base, self.len);

        for (i, slot) in self.slots_mut().iter_mut().enumerate() {
            *slot = SgDescriptor::default();
            slot.set_next(base.offset((((i + 1) % len) * size_of::<SgDescriptor>()) as u64));
            if let Some(buffer) = buffers.get(i) {
                if let Some(phys) = buffer.physical_address() {
                    slot.set_buffer(phys, buffer.size());
                }
            }
        }
    }
}

// The view is only reachable through the pool that owns the backing memory.
unsafe impl Send for DescriptorTable {}
unsafe impl Sync for DescriptorTable {}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("physical_base", &self.physical_base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::{HeapAllocator, PhysicalAllocator};

    #[test]
    fn test_descriptor_layout() {
        assert_eq!(size_of::<SgDescriptor>(), 64);
        assert_eq!(std::mem::align_of::<SgDescriptor>(), 64);
        assert_eq!(SgDescriptor::MAX_TRANSFER_LEN, 0x7F_FFFF);
    }

    #[test]
    fn test_chain_builds_ring_in_buffer_order() {
        let heap = HeapAllocator::default();
        let buffers = vec![
            DmaBuffer::allocate(&heap, 4096),
            DmaBuffer::allocate(&heap, 8192),
            DmaBuffer::allocate(&heap, 4096),
        ];
        let table_buffer = DmaBuffer::allocate(&heap, 3 * size_of::<SgDescriptor>());

        let mut table = DescriptorTable::over(&table_buffer, 3, 64).unwrap();
        table.chain(&buffers);

        assert_eq!(table.len(), 3);
        for (i, slot) in table.slots().iter().enumerate() {
            assert_eq!(Some(slot.buffer()), buffers[i].physical_address());
            assert_eq!(slot.transfer_len(), buffers[i].size());
            assert_eq!(Some(slot.next()), table.slot_address((i + 1) % 3));
        }

        let heap_ref: &dyn PhysicalAllocator = &heap;
        for mut buffer in buffers.into_iter().chain(std::iter::once(table_buffer)) {
            buffer.release(heap_ref);
        }
    }

    #[test]
    fn test_failed_buffer_slot_stays_empty() {
        let heap = HeapAllocator::new(4096 + 128);
        let buffers = vec![DmaBuffer::allocate(&heap, 4096), DmaBuffer::allocate(&heap, 8192)];
        assert!(buffers[1].is_failed());

        let mut table_buffer = DmaBuffer::allocate(&heap, 2 * size_of::<SgDescriptor>());
        let mut table = DescriptorTable::over(&table_buffer, 2, 64).unwrap();
        table.chain(&buffers);

        assert_eq!(table.slots()[1].buffer(), PhysAddr(0));
        assert_eq!(table.slots()[1].transfer_len(), 0);
        assert_eq!(Some(table.slots()[1].next()), table.slot_address(0));

        drop(table);
        table_buffer.release(&heap);
        for mut buffer in buffers {
            buffer.release(&heap);
        }
    }

    #[test]
    fn test_view_requires_memory_and_room() {
        let heap = HeapAllocator::default();
        let small = DmaBuffer::allocate(&heap, 64);
        assert!(DescriptorTable::over(&small, 2, 64).is_none());
        assert!(DescriptorTable::over(&DmaBuffer::unallocated(4096), 1, 64).is_none());
        assert!(DescriptorTable::over(&small, 1, 64).is_some());
    }
}
