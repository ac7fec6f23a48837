//! Allocate/free requests: wire records and the validator that admits them

pub mod validator;
pub mod wire;

pub use validator::{AllocRequest, RawRequest, RequestValidator, ValidatedRequest};
pub use wire::{
    place_alloc_request, place_free_request, AllocRequestHeader, BufferRecord, FreeRequestHeader,
    POOL_REQUEST_SENTINEL,
};
