//! Request validation and copy-in

use crate::{
    boundary::{UserMemory, UserMemoryExt, UserPtr},
    config::PoolConfig,
    error::{ChanPoolError, Result},
};

use super::wire::{AllocRequestHeader, BufferRecord, FreeRequestHeader};

/// A request as received: the kind plus the caller address of its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRequest {
    /// Address of an [`AllocRequestHeader`]
    Alloc(UserPtr),
    /// Address of a [`FreeRequestHeader`]
    Free(UserPtr),
}

/// Owner-resident copy of a validated allocate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRequest {
    sizes: Vec<usize>,
}

impl AllocRequest {
    /// Build a request directly from buffer sizes (in-process callers)
    pub fn new(sizes: Vec<usize>) -> Self {
        Self { sizes }
    }

    /// Number of buffers requested
    pub fn buffer_count(&self) -> usize {
        self.sizes.len()
    }

    /// Requested size of each buffer, in order
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Sum of all requested sizes, saturating at `usize::MAX`
    pub fn total_bytes(&self) -> usize {
        self.sizes.iter().fold(0usize, |total, &size| total.saturating_add(size))
    }
}

/// A request that passed validation and no longer references caller memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedRequest {
    Alloc(AllocRequest),
    Free,
}

/// Checks requests before they can reach a pool.
///
/// The validator never touches pool state. It copies the header, checks the
/// sentinel before trusting any other field, bounds the caller-supplied
/// count and sizes, and returns a copy that lives entirely in owner memory.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    sentinel: u32,
    max_buffers: usize,
    max_buffer_size: usize,
}

impl RequestValidator {
    /// Create a validator enforcing the limits of `config`
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            sentinel: config.sentinel,
            max_buffers: config.max_buffers,
            max_buffer_size: config.max_buffer_size,
        }
    }

    /// Validate a raw request and copy it into owner memory
    pub fn validate_and_copy<M: UserMemory + ?Sized>(
        &self,
        mem: &M,
        raw: RawRequest,
    ) -> Result<ValidatedRequest> {
        match raw {
            RawRequest::Alloc(ptr) => self.validate_alloc(mem, ptr).map(ValidatedRequest::Alloc),
            RawRequest::Free(ptr) => {
                self.validate_free(mem, ptr)?;
                Ok(ValidatedRequest::Free)
            }
        }
    }

    /// Validate an allocate request
    pub fn validate_alloc<M: UserMemory + ?Sized>(&self, mem: &M, ptr: UserPtr) -> Result<AllocRequest> {
        let header: AllocRequestHeader = mem.copy_in_value(ptr)?;
        self.check_sentinel(header.sentinel)?;

        if header.buffer_count > self.max_buffers as u64 {
            log::debug!(
                "rejecting allocate request for {} buffers (limit {})",
                header.buffer_count,
                self.max_buffers
            );
            return Err(ChanPoolError::limit_exceeded(
                "buffer_count",
                header.buffer_count,
                self.max_buffers as u64,
            ));
        }

        // Bounded by max_buffers above, so the cast cannot truncate
        let count = header.buffer_count as usize;
        if count == 0 {
            return Ok(AllocRequest::new(Vec::new()));
        }

        let buffers = UserPtr(usize::try_from(header.buffers).map_err(|_| {
            ChanPoolError::boundary_copy(usize::MAX, count.saturating_mul(std::mem::size_of::<BufferRecord>()))
        })?);
        let records: Vec<BufferRecord> = mem.copy_in_array(buffers, count)?;

        let sizes = records
            .iter()
            .map(|record| {
                if record.bytes > self.max_buffer_size as u64 {
                    return Err(ChanPoolError::limit_exceeded(
                        "buffer_size",
                        record.bytes,
                        self.max_buffer_size as u64,
                    ));
                }
                Ok(record.bytes as usize)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AllocRequest::new(sizes))
    }

    /// Validate a free request
    pub fn validate_free<M: UserMemory + ?Sized>(&self, mem: &M, ptr: UserPtr) -> Result<()> {
        let header: FreeRequestHeader = mem.copy_in_value(ptr)?;
        self.check_sentinel(header.sentinel)
    }

    /// Validate an in-process request against the same limits
    pub fn check_sizes(&self, sizes: &[usize]) -> Result<AllocRequest> {
        if sizes.len() > self.max_buffers {
            return Err(ChanPoolError::limit_exceeded(
                "buffer_count",
                sizes.len() as u64,
                self.max_buffers as u64,
            ));
        }
        if let Some(&size) = sizes.iter().find(|&&s| s > self.max_buffer_size) {
            return Err(ChanPoolError::limit_exceeded(
                "buffer_size",
                size as u64,
                self.max_buffer_size as u64,
            ));
        }
        Ok(AllocRequest::new(sizes.to_vec()))
    }

    fn check_sentinel(&self, sentinel: u32) -> Result<()> {
        if sentinel != self.sentinel {
            log::debug!(
                "rejecting request with sentinel {:#010x} (expected {:#010x})",
                sentinel,
                self.sentinel
            );
            return Err(ChanPoolError::invalid_request(format!(
                "sentinel {:#010x} does not match protocol sentinel",
                sentinel
            )));
        }
        Ok(())
    }
}
