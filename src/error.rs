//! Error types and handling for chanpool

/// Result type alias for chanpool operations
pub type Result<T> = std::result::Result<T, ChanPoolError>;

/// Errors surfaced by request validation, pool management and the
/// collaborators (arena mapping, physical free) behind them.
///
/// Per-buffer allocation failures are deliberately absent: they are recorded
/// in-band on the affected [`DmaBuffer`](crate::buffers::DmaBuffer) and never
/// fail a whole allocate call.
#[derive(Debug, thiserror::Error)]
pub enum ChanPoolError {
    /// Sentinel mismatch or otherwise malformed request header
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Caller memory could not be read during a boundary copy
    #[error("Boundary copy failed: {len} bytes at {address:#x}")]
    BoundaryCopy { address: usize, len: usize },

    /// Allocate attempted on a pool that is not Empty
    #[error("Pool already allocated with {buffer_count} buffers")]
    AlreadyAllocated { buffer_count: usize },

    /// Caller-supplied count or size above the configured maximum
    #[error("Limit exceeded: {parameter} requested {requested}, limit {limit}")]
    LimitExceeded {
        parameter: String,
        requested: u64,
        limit: u64,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Arena or mapping setup failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// The physical free primitive rejected a release
    #[error("Free failed: {size} bytes at bus address {physical_address:#x}: {message}")]
    FreeFailed {
        size: usize,
        physical_address: u64,
        message: String,
    },

    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },

    /// Lock poisoning and other concurrency failures
    #[error("Concurrency error: {message}")]
    Concurrency { message: String },
}

impl ChanPoolError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create a boundary copy error
    pub fn boundary_copy(address: usize, len: usize) -> Self {
        Self::BoundaryCopy { address, len }
    }

    /// Create an already allocated error
    pub fn already_allocated(buffer_count: usize) -> Self {
        Self::AlreadyAllocated { buffer_count }
    }

    /// Create a limit exceeded error
    pub fn limit_exceeded(parameter: impl Into<String>, requested: u64, limit: u64) -> Self {
        Self::LimitExceeded {
            parameter: parameter.into(),
            requested,
            limit,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create a free failure
    pub fn free_failed(size: usize, physical_address: u64, message: impl Into<String>) -> Self {
        Self::FreeFailed {
            size,
            physical_address,
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create a concurrency error
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Negative errno value reported by the ioctl-style surface
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidRequest { .. }
            | Self::LimitExceeded { .. }
            | Self::InvalidParameter { .. } => -libc::EINVAL,
            Self::BoundaryCopy { .. } => -libc::EACCES,
            Self::AlreadyAllocated { .. } => -libc::EBUSY,
            Self::Memory { .. } => -libc::ENOMEM,
            Self::FreeFailed { .. }
            | Self::Io { .. }
            | Self::Platform { .. }
            | Self::Concurrency { .. } => -libc::EIO,
        }
    }

    /// Whether the error was raised before any pool state was touched
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::BoundaryCopy { .. } | Self::LimitExceeded { .. }
        )
    }
}

impl From<std::io::Error> for ChanPoolError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl<T> From<std::sync::PoisonError<T>> for ChanPoolError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::concurrency(format!("lock poisoned: {}", err))
    }
}
