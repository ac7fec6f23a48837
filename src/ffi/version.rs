//! FFI version information functions

/// Get major version number
#[no_mangle]
pub extern "C" fn chanpool_version_major() -> u32 {
    crate::VERSION_MAJOR
}

/// Get minor version number
#[no_mangle]
pub extern "C" fn chanpool_version_minor() -> u32 {
    crate::VERSION_MINOR
}

/// Get patch version number
#[no_mangle]
pub extern "C" fn chanpool_version_patch() -> u32 {
    crate::VERSION_PATCH
}
