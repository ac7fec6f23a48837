//! Device-visible memory regions backing the physical allocators

pub mod config;
pub mod regions;

pub use config::{BackingType, RegionConfig};
pub use regions::DmaRegion;
