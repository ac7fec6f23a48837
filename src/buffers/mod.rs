//! DMA buffers and the per-channel pool that owns them
//!
//! A [`BufferPool`] holds the buffers of one channel together with the
//! scatter/gather [`DescriptorTable`] describing them to the engine.

pub mod buffer;
pub mod descriptor;
pub mod pool;
pub mod stats;

// Re-export main types
pub use buffer::{BufferState, DmaBuffer};
pub use descriptor::{DescriptorTable, SgDescriptor};
pub use pool::{AllocationSummary, BufferPool, ReleaseSummary};
pub use stats::PoolStats;
