//! A hardware channel owning one buffer pool behind a lock

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{
    allocators::PhysicalAllocator,
    boundary::{UserMemory, UserPtr},
    buffers::{AllocationSummary, BufferPool, PoolStats, ReleaseSummary},
    config::PoolConfig,
    error::{ChanPoolError, Result},
    request::{AllocRequest, RawRequest, RequestValidator, ValidatedRequest},
};

/// Result of a request handled by a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelResponse {
    Allocated(AllocationSummary),
    Released(ReleaseSummary),
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub id: u32,
    pub name: String,
    pub allocated: bool,
    pub buffer_count: usize,
    pub failed_buffers: usize,
    pub table_ready: bool,
    pub stats: PoolStats,
}

/// One data-movement channel.
///
/// Every request first goes through the [`RequestValidator`]; only a
/// validated, owner-resident request reaches the pool. The pool lock is held
/// for the whole pool operation so allocate and release on the same channel
/// never interleave.
#[derive(Debug)]
pub struct Channel {
    id: u32,
    validator: RequestValidator,
    pool: Mutex<BufferPool>,
}

impl Channel {
    /// Create a channel with an Empty pool
    pub fn new(id: u32, config: PoolConfig, allocator: Arc<dyn PhysicalAllocator>) -> Result<Self> {
        let validator = RequestValidator::new(&config);
        let pool = BufferPool::new(config, allocator)?;

        log::info!("channel {} ('{}') created", id, pool.config().name);

        Ok(Self {
            id,
            validator,
            pool: Mutex::new(pool),
        })
    }

    /// Channel identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The validator guarding this channel
    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    /// Validate `raw` against caller memory `mem`, then run it on the pool
    pub fn handle<M: UserMemory + ?Sized>(&self, mem: &M, raw: RawRequest) -> Result<ChannelResponse> {
        let request = self
            .validator
            .validate_and_copy(mem, raw)
            .inspect_err(|e| log::warn!("channel {}: rejected request: {}", self.id, e))?;

        match request {
            ValidatedRequest::Alloc(request) => self.run_allocate(&request).map(ChannelResponse::Allocated),
            ValidatedRequest::Free => self.run_release().map(ChannelResponse::Released),
        }
    }

    /// Handle an allocate request whose header lives at `ptr`
    pub fn allocate<M: UserMemory + ?Sized>(&self, mem: &M, ptr: UserPtr) -> Result<AllocationSummary> {
        let request = self.validator.validate_alloc(mem, ptr)?;
        self.run_allocate(&request)
    }

    /// Handle a free request whose header lives at `ptr`
    pub fn free<M: UserMemory + ?Sized>(&self, mem: &M, ptr: UserPtr) -> Result<ReleaseSummary> {
        self.validator.validate_free(mem, ptr)?;
        self.run_release()
    }

    /// Allocate from in-process sizes, subject to the same limits
    pub fn allocate_sizes(&self, sizes: &[usize]) -> Result<AllocationSummary> {
        let request = self.validator.check_sizes(sizes)?;
        self.run_allocate(&request)
    }

    /// Release from an in-process caller
    pub fn release(&self) -> Result<ReleaseSummary> {
        self.run_release()
    }

    /// Exclusive access to the pool, e.g. for the mapping or transfer steps
    pub fn lock(&self) -> Result<MutexGuard<'_, BufferPool>> {
        self.pool
            .lock()
            .map_err(|_| ChanPoolError::concurrency(format!("channel {} pool lock poisoned", self.id)))
    }

    /// Snapshot of the channel state
    pub fn status(&self) -> Result<ChannelStatus> {
        let pool = self.lock()?;
        Ok(ChannelStatus {
            id: self.id,
            name: pool.config().name.clone(),
            allocated: pool.is_allocated(),
            buffer_count: pool.buffer_count(),
            failed_buffers: pool.buffers().iter().filter(|b| b.is_failed()).count(),
            table_ready: pool.descriptor_table().is_some(),
            stats: pool.stats().clone(),
        })
    }

    fn run_allocate(&self, request: &AllocRequest) -> Result<AllocationSummary> {
        let mut pool = self.lock()?;
        let summary = pool.allocate(request)?;

        log::info!(
            "channel {}: allocated {} of {} buffers ({} bytes requested)",
            self.id,
            summary.allocated,
            summary.buffer_count,
            request.total_bytes()
        );
        Ok(summary)
    }

    fn run_release(&self) -> Result<ReleaseSummary> {
        let mut pool = self.lock()?;
        let summary = pool.release();

        if summary.freed > 0 || summary.free_failures > 0 {
            log::info!("channel {}: released {} regions", self.id, summary.freed);
        }
        Ok(summary)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let pool = match self.pool.get_mut() {
            Ok(pool) => pool,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pool.is_allocated() {
            let summary = pool.release();
            log::info!(
                "channel {} destroyed, forced release of {} regions",
                self.id,
                summary.freed
            );
        }
    }
}
