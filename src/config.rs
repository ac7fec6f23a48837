//! Buffer pool configuration

use serde::{Deserialize, Serialize};

use crate::{
    allocators::PAGE_SIZE,
    buffers::SgDescriptor,
    error::{ChanPoolError, Result},
    request::POOL_REQUEST_SENTINEL,
};

/// Configuration for a channel's buffer pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Name of the pool, used in log output
    pub name: String,
    /// Sentinel every request must carry
    pub sentinel: u32,
    /// Maximum number of buffers a single allocate request may ask for
    pub max_buffers: usize,
    /// Maximum size of one buffer in bytes
    pub max_buffer_size: usize,
    /// Alignment of the descriptor table records
    pub table_alignment: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            sentinel: POOL_REQUEST_SENTINEL,
            max_buffers: 1024,
            max_buffer_size: SgDescriptor::MAX_TRANSFER_LEN,
            table_alignment: std::mem::align_of::<SgDescriptor>(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with custom name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the request sentinel
    pub fn with_sentinel(mut self, sentinel: u32) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Set maximum buffer count
    pub fn with_max_buffers(mut self, count: usize) -> Self {
        self.max_buffers = count;
        self
    }

    /// Set maximum buffer size
    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Set descriptor table alignment
    pub fn with_table_alignment(mut self, alignment: usize) -> Self {
        self.table_alignment = alignment;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_buffers == 0 {
            return Err(ChanPoolError::invalid_parameter(
                "max_buffers",
                "Max buffers cannot be zero",
            ));
        }

        if self.max_buffer_size == 0 {
            return Err(ChanPoolError::invalid_parameter(
                "max_buffer_size",
                "Max buffer size cannot be zero",
            ));
        }

        if self.max_buffer_size > SgDescriptor::MAX_TRANSFER_LEN {
            return Err(ChanPoolError::invalid_parameter(
                "max_buffer_size",
                format!(
                    "Descriptors cannot describe more than {} bytes",
                    SgDescriptor::MAX_TRANSFER_LEN
                ),
            ));
        }

        if !self.table_alignment.is_power_of_two() {
            return Err(ChanPoolError::invalid_parameter(
                "table_alignment",
                "Alignment must be a power of two",
            ));
        }

        if self.table_alignment < std::mem::align_of::<SgDescriptor>() {
            return Err(ChanPoolError::invalid_parameter(
                "table_alignment",
                "Alignment is below the descriptor record alignment",
            ));
        }

        // Physical allocators only guarantee page alignment
        if self.table_alignment > PAGE_SIZE {
            return Err(ChanPoolError::invalid_parameter(
                "table_alignment",
                format!("Alignment cannot exceed the {} byte page size", PAGE_SIZE),
            ));
        }

        Ok(())
    }

    /// Bytes needed for a descriptor table covering `buffer_count` buffers
    pub fn table_bytes(&self, buffer_count: usize) -> usize {
        buffer_count * std::mem::size_of::<SgDescriptor>()
    }

    /// Worst-case bytes one fully populated pool can pin
    pub fn max_pool_bytes(&self) -> usize {
        self.max_buffers
            .saturating_mul(self.max_buffer_size)
            .saturating_add(self.table_bytes(self.max_buffers))
    }
}

/// Builder pattern for pool configuration
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: PoolConfig::new(name),
        }
    }

    /// Set sentinel
    pub fn sentinel(mut self, sentinel: u32) -> Self {
        self.config.sentinel = sentinel;
        self
    }

    /// Set maximum buffer count
    pub fn max_buffers(mut self, count: usize) -> Self {
        self.config.max_buffers = count;
        self
    }

    /// Set maximum buffer size
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    /// Set descriptor table alignment
    pub fn table_alignment(mut self, alignment: usize) -> Self {
        self.config.table_alignment = alignment;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
