//! Caller-memory boundary
//!
//! Requests arrive as addresses in memory the caller controls. Nothing in
//! this crate dereferences such an address directly: every read goes through
//! [`UserMemory::copy_in`], which copies into an owned destination and fails
//! with [`ChanPoolError::BoundaryCopy`] when the source is not readable.

use std::{collections::BTreeMap, fmt, mem::size_of};

use crate::error::{ChanPoolError, Result};

/// Address in caller-owned memory
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UserPtr(pub usize);

impl UserPtr {
    /// The null caller address
    pub const NULL: UserPtr = UserPtr(0);

    /// Raw address value
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Whether this is the null address
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one, if it does not wrap
    pub fn checked_add(self, bytes: usize) -> Option<UserPtr> {
        self.0.checked_add(bytes).map(UserPtr)
    }
}

impl fmt::Debug for UserPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserPtr({:#x})", self.0)
    }
}

/// Plain `#[repr(C)]` records that may be copied across the boundary.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no padding bytes, and accept
/// every bit pattern as a valid value.
pub unsafe trait WireRecord: Copy + 'static {}

unsafe impl WireRecord for u32 {}
unsafe impl WireRecord for u64 {}

/// View a wire record as its raw bytes
pub fn record_bytes<T: WireRecord>(record: &T) -> &[u8] {
    // SAFETY: WireRecord guarantees no padding, so every byte is initialised.
    unsafe { std::slice::from_raw_parts(record as *const T as *const u8, size_of::<T>()) }
}

/// View a slice of wire records as raw bytes
pub fn records_bytes<T: WireRecord>(records: &[T]) -> &[u8] {
    // SAFETY: as for `record_bytes`, over a contiguous slice.
    unsafe { std::slice::from_raw_parts(records.as_ptr() as *const u8, std::mem::size_of_val(records)) }
}

/// Fallible copy-in from caller-owned memory
pub trait UserMemory {
    /// Copy `dest.len()` bytes starting at `src` into `dest`
    fn copy_in(&self, dest: &mut [u8], src: UserPtr) -> Result<()>;
}

/// Typed helpers on top of [`UserMemory::copy_in`]
pub trait UserMemoryExt: UserMemory {
    /// Copy one wire record
    fn copy_in_value<T: WireRecord>(&self, src: UserPtr) -> Result<T> {
        let mut bytes = vec![0u8; size_of::<T>()];
        self.copy_in(&mut bytes, src)?;
        // SAFETY: bytes holds exactly size_of::<T>() initialised bytes and
        // WireRecord accepts any bit pattern.
        Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }

    /// Copy `count` consecutive wire records
    fn copy_in_array<T: WireRecord>(&self, src: UserPtr, count: usize) -> Result<Vec<T>> {
        let len = count
            .checked_mul(size_of::<T>())
            .ok_or_else(|| ChanPoolError::boundary_copy(src.addr(), usize::MAX))?;

        let mut bytes = vec![0u8; len];
        self.copy_in(&mut bytes, src)?;

        Ok(bytes
            .chunks_exact(size_of::<T>())
            // SAFETY: each chunk is size_of::<T>() initialised bytes.
            .map(|chunk| unsafe { std::ptr::read_unaligned(chunk.as_ptr() as *const T) })
            .collect())
    }
}

impl<M: UserMemory + ?Sized> UserMemoryExt for M {}

/// Copy-in from memory that belongs to the current process.
///
/// Used by the C API, where callers hand over pointers into their own
/// address space. Null is rejected; any other address is trusted.
#[derive(Debug)]
pub struct RawUserMemory {
    _private: (),
}

impl RawUserMemory {
    /// Create a raw copier
    ///
    /// # Safety
    /// Every non-null address later passed to `copy_in` must be valid for
    /// reads of the requested length.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl UserMemory for RawUserMemory {
    fn copy_in(&self, dest: &mut [u8], src: UserPtr) -> Result<()> {
        if dest.is_empty() {
            return Ok(());
        }
        if src.is_null() || src.checked_add(dest.len()).is_none() {
            return Err(ChanPoolError::boundary_copy(src.addr(), dest.len()));
        }
        // SAFETY: guaranteed by the contract of `RawUserMemory::new`.
        unsafe {
            std::ptr::copy_nonoverlapping(src.addr() as *const u8, dest.as_mut_ptr(), dest.len());
        }
        Ok(())
    }
}

/// A simulated caller address space made of mapped segments.
///
/// A copy succeeds only when the whole source range lies inside one
/// segment, which models inaccessible and partially unmapped requests.
#[derive(Debug, Default, Clone)]
pub struct SimulatedUserMemory {
    segments: BTreeMap<usize, Vec<u8>>,
    next_base: usize,
}

impl SimulatedUserMemory {
    /// First address handed out by [`place`](Self::place)
    pub const BASE_ADDRESS: usize = 0x4000_0000;

    /// Create an empty address space
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            next_base: Self::BASE_ADDRESS,
        }
    }

    /// Map `bytes` at `base`, replacing any segment starting there
    pub fn map(&mut self, base: UserPtr, bytes: Vec<u8>) {
        self.segments.insert(base.addr(), bytes);
    }

    /// Map `bytes` at the next free page-aligned address
    pub fn place(&mut self, bytes: Vec<u8>) -> UserPtr {
        if self.next_base == 0 {
            self.next_base = Self::BASE_ADDRESS;
        }
        let base = UserPtr(self.next_base);
        let span = crate::allocators::align_up(bytes.len().max(1), crate::allocators::PAGE_SIZE);
        // Leave an unmapped guard page between segments
        self.next_base += span + crate::allocators::PAGE_SIZE;
        self.map(base, bytes);
        base
    }

    /// Map one wire record
    pub fn place_value<T: WireRecord>(&mut self, record: &T) -> UserPtr {
        self.place(record_bytes(record).to_vec())
    }

    /// Map a slice of wire records
    pub fn place_slice<T: WireRecord>(&mut self, records: &[T]) -> UserPtr {
        self.place(records_bytes(records).to_vec())
    }

    /// Remove the segment starting at `base`
    pub fn unmap(&mut self, base: UserPtr) -> Option<Vec<u8>> {
        self.segments.remove(&base.addr())
    }

    /// Shorten the segment at `base` to `len` bytes
    pub fn truncate(&mut self, base: UserPtr, len: usize) {
        if let Some(segment) = self.segments.get_mut(&base.addr()) {
            segment.truncate(len);
        }
    }

    /// Number of mapped segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl UserMemory for SimulatedUserMemory {
    fn copy_in(&self, dest: &mut [u8], src: UserPtr) -> Result<()> {
        if dest.is_empty() {
            return Ok(());
        }

        let len = dest.len();
        let fault = || ChanPoolError::boundary_copy(src.addr(), len);
        let end = src.checked_add(len).ok_or_else(fault)?;

        let (&base, segment) = self.segments.range(..=src.addr()).next_back().ok_or_else(fault)?;
        if end.addr() > base + segment.len() {
            return Err(fault());
        }

        let start = src.addr() - base;
        dest.copy_from_slice(&segment[start..start + len]);
        Ok(())
    }
}
