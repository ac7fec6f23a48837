//! FFI functions for channel lifecycle and allocate/free requests

use std::{ffi::c_long, sync::Arc};

use crate::{
    allocators::HeapAllocator,
    boundary::{RawUserMemory, UserPtr},
    channel::Channel,
    config::PoolConfig,
    error::ChanPoolError,
    request::{AllocRequestHeader, FreeRequestHeader, RawRequest},
};

/// Opaque channel handle for C callers
pub type ChanPoolChannelHandle = *mut Channel;

fn to_status(result: crate::Result<()>) -> c_long {
    match result {
        Ok(()) => 0,
        Err(e) => c_long::from(e.errno()),
    }
}

/// Create a channel backed by the process heap.
///
/// Returns null when `max_buffers` is zero.
#[no_mangle]
pub extern "C" fn chanpool_channel_create(id: u32, max_buffers: usize) -> ChanPoolChannelHandle {
    let config = PoolConfig::new(format!("channel{}", id)).with_max_buffers(max_buffers);

    match Channel::new(id, config, Arc::new(HeapAllocator::default())) {
        Ok(channel) => Box::into_raw(Box::new(channel)),
        Err(e) => {
            log::error!("chanpool_channel_create: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Allocate the channel's buffers from the request at `request`
///
/// # Safety
/// `channel` must come from [`chanpool_channel_create`] and not have been
/// destroyed. `request` and the buffer array it points to must be readable
/// for the lengths they declare.
#[no_mangle]
pub unsafe extern "C" fn chanpool_ioctl_alloc(
    channel: ChanPoolChannelHandle,
    request: *const AllocRequestHeader,
) -> c_long {
    let Some(channel) = channel.as_ref() else {
        return c_long::from(ChanPoolError::invalid_parameter("channel", "null handle").errno());
    };

    let mem = RawUserMemory::new();
    to_status(
        channel
            .handle(&mem, RawRequest::Alloc(UserPtr(request as usize)))
            .map(|_| ()),
    )
}

/// Release the channel's buffers
///
/// # Safety
/// As for [`chanpool_ioctl_alloc`], with `request` pointing at a free header.
#[no_mangle]
pub unsafe extern "C" fn chanpool_ioctl_free(
    channel: ChanPoolChannelHandle,
    request: *const FreeRequestHeader,
) -> c_long {
    let Some(channel) = channel.as_ref() else {
        return c_long::from(ChanPoolError::invalid_parameter("channel", "null handle").errno());
    };

    let mem = RawUserMemory::new();
    to_status(
        channel
            .handle(&mem, RawRequest::Free(UserPtr(request as usize)))
            .map(|_| ()),
    )
}

/// Number of buffers currently held, or a negative errno
///
/// # Safety
/// `channel` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn chanpool_channel_buffer_count(channel: ChanPoolChannelHandle) -> c_long {
    let Some(channel) = channel.as_ref() else {
        return c_long::from(ChanPoolError::invalid_parameter("channel", "null handle").errno());
    };

    match channel.lock() {
        Ok(pool) => pool.buffer_count() as c_long,
        Err(e) => c_long::from(e.errno()),
    }
}

/// Destroy a channel, releasing anything it still holds
///
/// # Safety
/// `channel` must come from [`chanpool_channel_create`] and must not be used
/// afterwards. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn chanpool_channel_destroy(channel: ChanPoolChannelHandle) {
    if !channel.is_null() {
        drop(Box::from_raw(channel));
    }
}
