//! Per-channel buffer pool: allocation, descriptor table build and release

use std::sync::Arc;

use crate::{
    allocators::PhysicalAllocator,
    config::PoolConfig,
    error::{ChanPoolError, Result},
    request::AllocRequest,
};

use super::{buffer::DmaBuffer, descriptor::DescriptorTable, stats::PoolStats};

/// Outcome of a successful allocate call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationSummary {
    /// Buffers requested
    pub buffer_count: usize,
    /// Buffers that received memory
    pub allocated: usize,
    /// Buffers whose allocation failed
    pub failed: usize,
    /// Whether the descriptor table is usable
    pub table_ready: bool,
}

impl AllocationSummary {
    /// Every buffer and the descriptor table were allocated
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.table_ready
    }
}

/// Outcome of a release call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Regions handed back to the physical allocator
    pub freed: usize,
    /// Regions skipped because they never held memory
    pub skipped: usize,
    /// Free calls that reported an error
    pub free_failures: usize,
}

impl ReleaseSummary {
    /// No free call reported an error
    pub fn is_clean(&self) -> bool {
        self.free_failures == 0
    }
}

#[derive(Debug)]
struct Allocation {
    buffers: Vec<DmaBuffer>,
    table_buffer: DmaBuffer,
    /// Dropped before `table_buffer` is freed
    table: Option<DescriptorTable>,
}

#[derive(Debug)]
enum PoolState {
    Empty,
    Allocated(Allocation),
}

/// The complete allocation state of one channel.
///
/// A pool is either Empty or Allocated. It moves to Allocated through one
/// [`allocate`](Self::allocate) and back to Empty through one
/// [`release`](Self::release); there is no resizing in between. Mutation
/// takes `&mut self`, so callers must hold exclusive access (see
/// [`Channel`](crate::channel::Channel) for the per-channel lock).
#[derive(Debug)]
pub struct BufferPool {
    config: PoolConfig,
    allocator: Arc<dyn PhysicalAllocator>,
    state: PoolState,
    stats: PoolStats,
}

impl BufferPool {
    /// Create an Empty pool drawing memory from `allocator`
    pub fn new(config: PoolConfig, allocator: Arc<dyn PhysicalAllocator>) -> Result<Self> {
        config.validate()?;

        log::debug!(
            "pool '{}': created over {} (max {} buffers of {} bytes)",
            config.name,
            allocator.type_name(),
            config.max_buffers,
            config.max_buffer_size
        );

        Ok(Self {
            config,
            allocator,
            state: PoolState::Empty,
            stats: PoolStats::new(),
        })
    }

    /// Allocate every buffer of `request` plus the descriptor table.
    ///
    /// Fails only when the pool is already Allocated. Individual buffer
    /// failures are recorded on the buffer and reported in the summary; the
    /// loop never stops early. A request for zero buffers leaves the pool
    /// Empty.
    pub fn allocate(&mut self, request: &AllocRequest) -> Result<AllocationSummary> {
        self.stats.allocate_calls += 1;

        if let PoolState::Allocated(allocation) = &self.state {
            self.stats.busy_rejections += 1;
            return Err(ChanPoolError::already_allocated(allocation.buffers.len()));
        }

        let buffer_count = request.buffer_count();
        if buffer_count == 0 {
            log::debug!("pool '{}': empty allocate request, nothing to do", self.config.name);
            return Ok(AllocationSummary::default());
        }

        let allocator = self.allocator.as_ref();
        let mut summary = AllocationSummary {
            buffer_count,
            ..Default::default()
        };

        let buffers: Vec<DmaBuffer> = request
            .sizes()
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                let buffer = DmaBuffer::allocate(allocator, size);
                if buffer.is_allocated() {
                    summary.allocated += 1;
                } else {
                    summary.failed += 1;
                    log::warn!(
                        "pool '{}': buffer {} ({} bytes) could not be allocated",
                        self.config.name,
                        index,
                        size
                    );
                }
                buffer
            })
            .collect();

        let table_buffer = DmaBuffer::allocate(allocator, self.config.table_bytes(buffer_count));
        let table = DescriptorTable::over(&table_buffer, buffer_count, self.config.table_alignment).map(
            |mut table| {
                table.chain(&buffers);
                table
            },
        );

        summary.table_ready = table.is_some();
        if !summary.table_ready {
            self.stats.table_failures += 1;
            log::warn!(
                "pool '{}': descriptor table for {} buffers is unusable",
                self.config.name,
                buffer_count
            );
        }

        self.stats.buffers_allocated += summary.allocated as u64;
        self.stats.buffer_failures += summary.failed as u64;
        self.stats.bytes_in_use = buffers
            .iter()
            .chain(std::iter::once(&table_buffer))
            .filter(|b| b.is_allocated())
            .fold(0usize, |total, b| total.saturating_add(b.size()));

        log::debug!(
            "pool '{}': allocated {}/{} buffers, table {}",
            self.config.name,
            summary.allocated,
            buffer_count,
            if summary.table_ready { "ready" } else { "missing" }
        );

        self.state = PoolState::Allocated(Allocation {
            buffers,
            table_buffer,
            table,
        });

        Ok(summary)
    }

    /// Return every region to the physical allocator and go back to Empty.
    ///
    /// Releasing an Empty pool is a no-op. Buffers that never received
    /// memory are skipped. A free call that reports an error is logged and
    /// counted, and the release carries on: the pool always ends up Empty.
    pub fn release(&mut self) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();

        let allocation = match std::mem::replace(&mut self.state, PoolState::Empty) {
            PoolState::Empty => {
                self.stats.empty_releases += 1;
                log::debug!("pool '{}': release on empty pool", self.config.name);
                return summary;
            }
            PoolState::Allocated(allocation) => allocation,
        };

        let Allocation {
            mut buffers,
            mut table_buffer,
            table,
        } = allocation;
        drop(table);

        let allocator = self.allocator.as_ref();
        for (index, buffer) in buffers.iter_mut().chain(std::iter::once(&mut table_buffer)).enumerate() {
            match buffer.release(allocator) {
                None => summary.skipped += 1,
                Some(Ok(())) => summary.freed += 1,
                Some(Err(e)) => {
                    summary.free_failures += 1;
                    log::warn!("pool '{}': freeing region {} failed: {}", self.config.name, index, e);
                }
            }
        }
        drop(buffers);

        self.stats.releases += 1;
        self.stats.frees_issued += (summary.freed + summary.free_failures) as u64;
        self.stats.free_failures += summary.free_failures as u64;
        self.stats.bytes_in_use = 0;

        log::debug!(
            "pool '{}': released {} regions, skipped {}, {} free failures",
            self.config.name,
            summary.freed,
            summary.skipped,
            summary.free_failures
        );

        summary
    }

    /// Whether the pool holds no allocation
    pub fn is_empty(&self) -> bool {
        matches!(self.state, PoolState::Empty)
    }

    /// Whether the pool holds an allocation
    pub fn is_allocated(&self) -> bool {
        !self.is_empty()
    }

    /// Number of buffers, 0 when Empty
    pub fn buffer_count(&self) -> usize {
        self.buffers().len()
    }

    /// Buffers in request order, empty when the pool is Empty
    pub fn buffers(&self) -> &[DmaBuffer] {
        match &self.state {
            PoolState::Empty => &[],
            PoolState::Allocated(allocation) => &allocation.buffers,
        }
    }

    /// Mutable access to the buffers, e.g. to record user mappings
    pub fn buffers_mut(&mut self) -> &mut [DmaBuffer] {
        match &mut self.state {
            PoolState::Empty => &mut [],
            PoolState::Allocated(allocation) => &mut allocation.buffers,
        }
    }

    /// Buffer at `index`
    pub fn buffer(&self, index: usize) -> Option<&DmaBuffer> {
        self.buffers().get(index)
    }

    /// The descriptor table, when one could be established
    pub fn descriptor_table(&self) -> Option<&DescriptorTable> {
        match &self.state {
            PoolState::Empty => None,
            PoolState::Allocated(allocation) => allocation.table.as_ref(),
        }
    }

    /// Mutable access to the descriptor table
    pub fn descriptor_table_mut(&mut self) -> Option<&mut DescriptorTable> {
        match &mut self.state {
            PoolState::Empty => None,
            PoolState::Allocated(allocation) => allocation.table.as_mut(),
        }
    }

    /// The buffer backing the descriptor table
    pub fn descriptor_table_buffer(&self) -> Option<&DmaBuffer> {
        match &self.state {
            PoolState::Empty => None,
            PoolState::Allocated(allocation) => Some(&allocation.table_buffer),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The physical allocator this pool draws from
    pub fn allocator(&self) -> &Arc<dyn PhysicalAllocator> {
        &self.allocator
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.is_allocated() {
            log::info!("pool '{}': dropped while allocated, forcing release", self.config.name);
            self.release();
        }
    }
}
