//! Error taxonomy and C error handles.

use std::ffi::CString;
use std::io;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;

use thiserror::Error;

/// Every way a helper operation can fail.
///
/// None of these cross the native boundary as-is: the boundary adapters turn
/// them into an empty path or `-1` and log the message.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    #[error("failed to read asset `{name}`: {source}")]
    AssetRead {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create directory {path:?}: {source}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to attach thread to the Java VM: {0}")]
    AttachFailed(String),
    #[error("failed to resolve managed method: {0}")]
    MethodResolutionFailed(String),
    #[error("worker thread exited without producing a result")]
    WorkerLost,
    #[error("timed out after {0:?} waiting for the worker thread")]
    TimedOut(std::time::Duration),
    #[error("{0} is not supported by this configuration")]
    Unsupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("platform lookup failed: {0}")]
    Platform(String),
}

/// Opaque error type for C callers.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct mkah_error_t;

struct ErrorHandle {
    message: CString,
}

pub(crate) fn cstring_from_str_lossy(value: &str) -> CString {
    let sanitized: String = if value.as_bytes().contains(&0) {
        value.chars().map(|c| if c == '\0' { ' ' } else { c }).collect()
    } else {
        value.to_owned()
    };
    CString::new(sanitized).unwrap_or_default()
}

pub(crate) fn clear_error(out_error: *mut *mut mkah_error_t) {
    if !out_error.is_null() {
        // Safety: caller provided a valid out_error pointer.
        unsafe {
            *out_error = ptr::null_mut();
        }
    }
}

pub(crate) fn write_error(out_error: *mut *mut mkah_error_t, message: impl Into<String>) {
    if out_error.is_null() {
        return;
    }
    let cstring = cstring_from_str_lossy(&message.into());
    let handle = Box::new(ErrorHandle { message: cstring });
    // Safety: out_error is non-null and points to writable memory.
    unsafe {
        *out_error = Box::into_raw(handle) as *mut mkah_error_t;
    }
}

/// Returns the message for an error allocated by the helper.
///
/// The returned pointer is valid as long as the error handle is alive.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_error_message(error: *const mkah_error_t) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    // Safety: error must be a valid handle allocated by the helper.
    let handle = unsafe { &*(error as *const ErrorHandle) };
    handle.message.as_ptr()
}

/// Frees an error returned by the helper.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_error_free(error: *mut mkah_error_t) {
    if error.is_null() {
        return;
    }
    // Safety: error must be a valid handle allocated by the helper.
    unsafe {
        drop(Box::from_raw(error as *mut ErrorHandle));
    }
}
