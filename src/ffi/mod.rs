//! C Foreign Function Interface (FFI) in the shape of a driver ioctl surface
//!
//! A channel is created once, then driven with allocate/free requests laid
//! out in the caller's own memory. Every entry point returns 0 or a negative
//! errno, matching what the character-device front end reports.

pub mod channel;
pub mod version;

pub use channel::{
    chanpool_channel_buffer_count, chanpool_channel_create, chanpool_channel_destroy,
    chanpool_ioctl_alloc, chanpool_ioctl_free, ChanPoolChannelHandle,
};

pub use version::{chanpool_version_major, chanpool_version_minor, chanpool_version_patch};
