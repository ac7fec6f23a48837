//! Configuration types for DMA arena regions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::allocators::PAGE_SIZE;

/// Types of backing storage for a DMA arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// Private anonymous mapping
    Anonymous,
    /// File-backed mapping
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific)
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl BackingType {
    /// Check if this backing type is supported on the current platform
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::Anonymous | BackingType::FileBacked => true,
            #[cfg(target_os = "linux")]
            BackingType::MemFd => true,
        }
    }

    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::Anonymous => "anonymous",
            BackingType::FileBacked => "file-backed",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for creating a DMA arena region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Name of the region
    pub name: String,
    /// Total size of the region in bytes
    pub size: usize,
    /// Backing type for the region
    pub backing_type: BackingType,
    /// Optional file path for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Device-visible address of the first byte of the region
    pub bus_base: u64,
    /// Permissions for file-backed regions (Unix permissions)
    pub permissions: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            bus_base: 0x1000_0000,
            permissions: 0o600,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the device-visible base address
    pub fn with_bus_base(mut self, bus_base: u64) -> Self {
        self.bus_base = bus_base;
        self
    }

    /// Set the permissions for file-backed regions
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ChanPoolError;

        if self.name.is_empty() {
            return Err(ChanPoolError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }

        if self.size == 0 || self.size % PAGE_SIZE != 0 {
            return Err(ChanPoolError::invalid_parameter(
                "size",
                format!("Region size must be a non-zero multiple of {}", PAGE_SIZE),
            ));
        }

        if self.bus_base % PAGE_SIZE as u64 != 0 {
            return Err(ChanPoolError::invalid_parameter(
                "bus_base",
                "Bus base address must be page aligned",
            ));
        }

        if self.bus_base.checked_add(self.size as u64).is_none() {
            return Err(ChanPoolError::invalid_parameter(
                "bus_base",
                "Region would wrap the bus address space",
            ));
        }

        if !self.backing_type.is_supported() {
            return Err(ChanPoolError::invalid_parameter(
                "backing_type",
                format!(
                    "Backing type {} is not supported on this platform",
                    self.backing_type.name()
                ),
            ));
        }

        Ok(())
    }

    /// Get the file path used for file-backed regions
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("chanpool_{}", self.name)))
    }
}
