//! Physical memory allocators backing the buffer pools

pub mod arena;
pub mod heap;
pub mod traits;

pub use arena::ArenaAllocator;
pub use heap::HeapAllocator;
pub use traits::{align_up, DmaMapping, PhysAddr, PhysicalAllocator, PAGE_SIZE};
