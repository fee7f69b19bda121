//! C entry points looked up by the Dart FFI layer.
//!
//! None of these report errors: failures become an empty string or `-1` and a
//! log line. Path results are written into a caller-owned buffer of
//! [`MEDIA_KIT_PATH_CAPACITY`] bytes.

#![allow(non_snake_case)]

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;

use log::{debug, error};

use crate::assets;
use crate::error::{clear_error, mkah_error_t, write_error, HelperError};
use crate::invoker;
use crate::registry;

/// Size of every `result` buffer handed to this module, terminator included.
pub const MEDIA_KIT_PATH_CAPACITY: usize = 2048;

fn read_arg(value: *const c_char, field: &'static str) -> Result<String, HelperError> {
    if value.is_null() {
        return Err(HelperError::InvalidArgument(format!("{field} was null")));
    }
    // Safety: caller guarantees a valid, NUL-terminated C string.
    let cstr = unsafe { CStr::from_ptr(value) };
    cstr.to_str()
        .map(str::to_owned)
        .map_err(|_| HelperError::InvalidArgument(format!("{field} was not valid UTF-8")))
}

/// Copies `value` into `result`, NUL-terminated. A value that does not fit
/// is replaced by the empty string rather than cut short.
///
/// # Safety
/// `result` must be null or point to at least `capacity` writable bytes.
pub(crate) unsafe fn write_result(result: *mut c_char, capacity: usize, value: &str) {
    if result.is_null() || capacity == 0 {
        return;
    }
    let bytes = value.as_bytes();
    let len = if bytes.len() < capacity {
        bytes.len()
    } else {
        error!(
            "result of {} bytes does not fit in {capacity}: {value}",
            bytes.len()
        );
        0
    };
    // Safety: `len + 1 <= capacity` bytes are writable per the contract above.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), result.cast::<u8>(), len);
        *result.add(len) = 0;
    }
}

/// Runs `f`, turning both errors and panics into `fallback`.
pub(crate) fn guarded<T>(operation: &str, fallback: T, f: impl FnOnce() -> Result<T, HelperError>) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            error!("{operation}: {err}");
            fallback
        }
        Err(_) => {
            error!("{operation}: panicked");
            fallback
        }
    }
}

pub(crate) fn copy_asset_to_dir(asset_name: &str) -> String {
    guarded("copy asset", String::new(), || {
        let file = assets::materialize(registry::global(), asset_name)?;
        debug!("{asset_name} -> {} ({:?})", file.path.display(), file.outcome);
        path_to_string(&file.path)
    })
}

pub(crate) fn open_file_descriptor(uri: &str) -> i32 {
    guarded("open file descriptor", -1, || {
        invoker::open_file_descriptor(registry::global(), uri)
    })
}

fn path_to_string(path: &Path) -> Result<String, HelperError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| HelperError::InvalidArgument(format!("{} is not valid UTF-8", path.display())))
}

/// Initializes the helper from native code instead of Java.
///
/// `java_vm` must point to the process `JavaVM` and `context` must be a valid
/// global JNI reference to an Android `Context`. Safe to call more than once;
/// values resolved by an earlier call are kept. When called from a thread the
/// JVM did not create, the app class loader is unreachable and descriptor
/// opening stays unavailable until `setApplicationContext` runs from Java.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_android_initialize_context(
    java_vm: *mut c_void,
    context: *mut c_void,
    out_error: *mut *mut mkah_error_t,
) -> bool {
    clear_error(out_error);
    if java_vm.is_null() {
        write_error(out_error, "java_vm was null");
        return false;
    }
    if context.is_null() {
        write_error(out_error, "context was null");
        return false;
    }

    #[cfg(target_os = "android")]
    {
        crate::logging::ensure_default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            crate::android::initialize_from_raw(java_vm, context)
        }));
        match result {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                write_error(out_error, err.to_string());
                false
            }
            Err(_) => {
                write_error(out_error, "panic while initializing Android context");
                false
            }
        }
    }

    #[cfg(not(target_os = "android"))]
    {
        write_error(out_error, "mkah_android_initialize_context is only supported on Android");
        false
    }
}

/// Materializes `asset_name` under the helper's private directory and writes
/// the resulting absolute path into `result`, or `""` on failure.
///
/// `result` must hold [`MEDIA_KIT_PATH_CAPACITY`] bytes.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperCopyAssetToDir(asset_name: *const c_char, result: *mut c_char) {
    let path = match read_arg(asset_name, "asset_name") {
        Ok(name) => copy_asset_to_dir(&name),
        Err(err) => {
            error!("copy asset: {err}");
            String::new()
        }
    };
    // Safety: the caller provides a MEDIA_KIT_PATH_CAPACITY byte buffer.
    unsafe { write_result(result, MEDIA_KIT_PATH_CAPACITY, &path) };
}

/// Alias of [`MediaKitAndroidHelperCopyAssetToDir`] kept for older Dart bindings.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperCopyAssetToExternalFilesDir(
    asset_name: *const c_char,
    result: *mut c_char,
) {
    MediaKitAndroidHelperCopyAssetToDir(asset_name, result);
}

/// Returns the process `JavaVM*`, or null before `setApplicationContext`.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperGetJavaVM() -> *mut c_void {
    registry::global().runtime_handle()
}

/// Writes the base directory into `result`, or `""` before initialization.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperGetBaseDirectory(result: *mut c_char) {
    let value = guarded("base directory", String::new(), || {
        let base = registry::global()
            .base_directory()
            .ok_or(HelperError::NotInitialized("base directory"))?;
        path_to_string(base)
    });
    // Safety: the caller provides a MEDIA_KIT_PATH_CAPACITY byte buffer.
    unsafe { write_result(result, MEDIA_KIT_PATH_CAPACITY, &value) };
}

/// Returns the platform API level, or `-1` before initialization.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperGetAPILevel() -> i32 {
    registry::global().api_level()
}

/// Returns 1 on emulators, 0 on physical devices and before initialization.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperIsEmulator() -> i8 {
    i8::from(registry::global().emulator().as_bool())
}

/// Opens `uri` through the Android content resolver. Returns `-1` on failure.
///
/// Blocks the calling thread until the managed side answers.
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperOpenFileDescriptor(uri: *const c_char) -> i32 {
    match read_arg(uri, "uri") {
        Ok(uri) => open_file_descriptor(&uri),
        Err(err) => {
            error!("open file descriptor: {err}");
            -1
        }
    }
}

/// Closes a descriptor returned by [`MediaKitAndroidHelperOpenFileDescriptor`].
#[unsafe(no_mangle)]
pub extern "C" fn MediaKitAndroidHelperCloseFileDescriptor(fd: i32) {
    invoker::close_file_descriptor(fd);
}
