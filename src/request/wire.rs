//! Request records as they sit in caller memory
//!
//! All records are `#[repr(C)]` with explicit reserved words so their
//! layout has no padding and matches the C declarations in the ioctl header.

use crate::boundary::{SimulatedUserMemory, UserPtr, WireRecord};

/// Sentinel every well-formed request carries ("CHPL" little-endian)
pub const POOL_REQUEST_SENTINEL: u32 = 0x4C50_4843;

/// Header of an allocate request
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocRequestHeader {
    pub sentinel: u32,
    pub reserved: u32,
    /// Number of entries in the `buffers` array
    pub buffer_count: u64,
    /// Caller address of `buffer_count` [`BufferRecord`]s
    pub buffers: u64,
}

impl AllocRequestHeader {
    /// Header with the protocol sentinel
    pub fn new(buffer_count: usize, buffers: UserPtr) -> Self {
        Self {
            sentinel: POOL_REQUEST_SENTINEL,
            reserved: 0,
            buffer_count: buffer_count as u64,
            buffers: buffers.addr() as u64,
        }
    }

    /// Override the sentinel
    pub fn with_sentinel(mut self, sentinel: u32) -> Self {
        self.sentinel = sentinel;
        self
    }
}

/// Header of a free request
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeRequestHeader {
    pub sentinel: u32,
    pub reserved: u32,
}

impl FreeRequestHeader {
    /// Header with the protocol sentinel
    pub fn new() -> Self {
        Self {
            sentinel: POOL_REQUEST_SENTINEL,
            reserved: 0,
        }
    }

    /// Override the sentinel
    pub fn with_sentinel(mut self, sentinel: u32) -> Self {
        self.sentinel = sentinel;
        self
    }
}

/// One buffer entry of an allocate request.
///
/// Callers reuse their buffer descriptor layout for the request, so the
/// address fields are present on the wire; only `bytes` is read.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRecord {
    pub bytes: u64,
    pub physical_address: u64,
    pub kernel_address: u64,
    pub user_address: u64,
}

impl BufferRecord {
    /// Record requesting `bytes` bytes
    pub fn with_size(bytes: usize) -> Self {
        Self {
            bytes: bytes as u64,
            ..Default::default()
        }
    }
}

unsafe impl WireRecord for AllocRequestHeader {}
unsafe impl WireRecord for FreeRequestHeader {}
unsafe impl WireRecord for BufferRecord {}

/// Lay out a complete allocate request in a simulated caller address space
pub fn place_alloc_request(mem: &mut SimulatedUserMemory, sentinel: u32, sizes: &[usize]) -> UserPtr {
    let records: Vec<BufferRecord> = sizes.iter().map(|&s| BufferRecord::with_size(s)).collect();
    let buffers = if records.is_empty() {
        UserPtr::NULL
    } else {
        mem.place_slice(&records)
    };
    mem.place_value(&AllocRequestHeader::new(sizes.len(), buffers).with_sentinel(sentinel))
}

/// Lay out a free request in a simulated caller address space
pub fn place_free_request(mem: &mut SimulatedUserMemory, sentinel: u32) -> UserPtr {
    mem.place_value(&FreeRequestHeader::new().with_sentinel(sentinel))
}
