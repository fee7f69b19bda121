//! Helper configuration and its C surface.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use std::time::Duration;

use crate::error::{clear_error, mkah_error_t, write_error};
use crate::registry;

/// Namespace directory all materialized assets are flattened into.
pub const DEFAULT_NAMESPACE: &str = "com.alexmercerind.media_kit";

/// Which private storage area serves as the base directory.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BaseDirectoryKind {
    /// `Context.getExternalFilesDir(null)`.
    #[default]
    External,
    /// `Context.getFilesDir()`.
    Internal,
}

/// What to do when writing a materialized file fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WritePolicy {
    /// Log the failure and still hand back the target path.
    #[default]
    Lenient,
    /// Report the failure to the caller.
    Strict,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HelperConfig {
    pub base_directory: BaseDirectoryKind,
    pub namespace: String,
    pub supports_descriptor_open: bool,
    pub write_policy: WritePolicy,
    /// `None` blocks until the worker answers.
    pub invoke_timeout: Option<Duration>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            base_directory: BaseDirectoryKind::External,
            namespace: DEFAULT_NAMESPACE.to_string(),
            supports_descriptor_open: true,
            write_policy: WritePolicy::Lenient,
            invoke_timeout: None,
        }
    }
}

/// Base directory selector for C callers.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub enum mkah_base_directory_t {
    MKAH_BASE_DIRECTORY_EXTERNAL = 0,
    MKAH_BASE_DIRECTORY_INTERNAL = 1,
}

impl TryFrom<u32> for BaseDirectoryKind {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            value if value == mkah_base_directory_t::MKAH_BASE_DIRECTORY_EXTERNAL as u32 => {
                Ok(BaseDirectoryKind::External)
            }
            value if value == mkah_base_directory_t::MKAH_BASE_DIRECTORY_INTERNAL as u32 => {
                Ok(BaseDirectoryKind::Internal)
            }
            other => Err(format!("unknown base directory {other}")),
        }
    }
}

/// Configuration for the helper.
///
/// `base_directory` holds an `mkah_base_directory_t` value.
/// `namespace` may be null to keep the default namespace directory.
/// `invoke_timeout_ms` of 0 means the descriptor call-out waits indefinitely.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct mkah_config_t {
    pub base_directory: u32,
    pub namespace: *const c_char,
    pub supports_descriptor_open: bool,
    pub strict_writes: bool,
    pub invoke_timeout_ms: u64,
}

fn resolve_config(config: &mkah_config_t) -> Result<HelperConfig, String> {
    let namespace = if config.namespace.is_null() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        // Safety: caller guarantees a valid, NUL-terminated C string.
        let value = unsafe { CStr::from_ptr(config.namespace) };
        let value = value
            .to_str()
            .map_err(|_| "namespace was not valid UTF-8".to_string())?;
        validate_namespace(value)?;
        value.to_string()
    };

    Ok(HelperConfig {
        base_directory: BaseDirectoryKind::try_from(config.base_directory)?,
        namespace,
        supports_descriptor_open: config.supports_descriptor_open,
        write_policy: if config.strict_writes {
            WritePolicy::Strict
        } else {
            WritePolicy::Lenient
        },
        invoke_timeout: (config.invoke_timeout_ms > 0)
            .then(|| Duration::from_millis(config.invoke_timeout_ms)),
    })
}

fn validate_namespace(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("namespace was empty".to_string());
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(format!("namespace `{value}` must be a single directory name"));
    }
    Ok(())
}

/// Initializes default configuration values.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_config_init(config: *mut mkah_config_t) {
    if config.is_null() {
        return;
    }
    // Safety: caller provided a writable config pointer.
    unsafe {
        *config = mkah_config_t {
            base_directory: mkah_base_directory_t::MKAH_BASE_DIRECTORY_EXTERNAL as u32,
            namespace: ptr::null(),
            supports_descriptor_open: true,
            strict_writes: false,
            invoke_timeout_ms: 0,
        };
    }
}

/// Applies a helper configuration.
///
/// Call before the managed side runs `setApplicationContext`: the base
/// directory is resolved once, so later calls only affect the namespace,
/// write policy and descriptor settings.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_configure(
    config: *const mkah_config_t,
    out_error: *mut *mut mkah_error_t,
) -> bool {
    clear_error(out_error);
    // Safety: caller provided either null or a valid config pointer.
    let Some(config) = (unsafe { config.as_ref() }) else {
        write_error(out_error, "config was null");
        return false;
    };
    match resolve_config(config) {
        Ok(config) => {
            registry::global().configure(config);
            true
        }
        Err(message) => {
            write_error(out_error, message);
            false
        }
    }
}
