//! # chanpool - Per-channel DMA buffer pools
//!
//! chanpool manages the lifecycle of the physically contiguous buffers a
//! scatter/gather DMA channel works on: validating allocate/free requests
//! that arrive from an untrusted caller, allocating the buffers and the
//! descriptor table that describes them, and releasing everything again.
//!
//! ## Features
//!
//! - **Request validation**: sentinel check and bounded copy-in before any resource is touched
//! - **Single-allocation pools**: a pool is Empty or Allocated, never in between
//! - **Best-effort allocation**: per-buffer failures are recorded in-band, not fatal
//! - **Descriptor tables**: 64-byte AXI-style records chained into a ring
//! - **Pluggable physical memory**: arena over an mmap'd region or the process heap
//! - **C API**: ioctl-shaped entry points returning negative errno values
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   RawRequest   ┌──────────────────┐
//! │ caller memory│ ─────────────► │ RequestValidator │
//! └──────────────┘   copy_in      └────────┬─────────┘
//!                                          │ ValidatedRequest
//!                                          ▼
//!                     ┌──────────────────────────────────┐
//!                     │ Channel (Mutex<BufferPool>)      │
//!                     │  buffers[]  +  DescriptorTable   │
//!                     └────────────────┬─────────────────┘
//!                                      │ allocate / free
//!                                      ▼
//!                     ┌──────────────────────────────────┐
//!                     │ PhysicalAllocator (arena / heap) │
//!                     └──────────────────────────────────┘
//! ```

// Core modules
pub mod error;
pub mod config;
pub mod memory;
pub mod allocators;
pub mod boundary;
pub mod request;
pub mod buffers;
pub mod channel;

#[cfg(feature = "c-api")]
pub mod ffi;

// Main API re-exports
pub use error::{ChanPoolError, Result};
pub use config::{PoolConfig, PoolConfigBuilder};
pub use memory::{BackingType, DmaRegion, RegionConfig};
pub use allocators::{ArenaAllocator, DmaMapping, HeapAllocator, PhysAddr, PhysicalAllocator};
pub use boundary::{RawUserMemory, SimulatedUserMemory, UserMemory, UserPtr};
pub use request::{
    AllocRequest, AllocRequestHeader, BufferRecord, FreeRequestHeader, RawRequest, RequestValidator,
    ValidatedRequest, POOL_REQUEST_SENTINEL,
};
pub use buffers::{
    AllocationSummary, BufferPool, BufferState, DescriptorTable, DmaBuffer, PoolStats, ReleaseSummary,
    SgDescriptor,
};
pub use channel::{Channel, ChannelResponse, ChannelStatus};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 3;
pub const VERSION_PATCH: u32 = 0;
