//! Logging configuration for the helper.
//!
//! Records go to a C callback when one is configured, otherwise to logcat
//! (tag `media_kit`) on Android and stderr everywhere else.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Once, RwLock};

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

use crate::error::{clear_error, cstring_from_str_lossy, mkah_error_t, write_error};

const LOGGER_STATE_UNINIT: u8 = 0;
const LOGGER_STATE_READY: u8 = 1;
const LOGGER_STATE_FAILED: u8 = 2;

/// Target prefix shared by every record this crate emits.
const CRATE_TARGET: &str = "mediakitandroidhelper";

static LOGGER_STATE: AtomicU8 = AtomicU8::new(LOGGER_STATE_UNINIT);
static LOGGER_INIT: Once = Once::new();
static LOGGER_CONFIGURED: AtomicBool = AtomicBool::new(false);
static HELPER_LOGGER: Lazy<HelperLogger> = Lazy::new(HelperLogger::new);

/// Log level values for helper logging.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub enum mkah_log_level_t {
    MKAH_LOG_LEVEL_OFF = 0,
    MKAH_LOG_LEVEL_ERROR = 1,
    MKAH_LOG_LEVEL_WARN = 2,
    MKAH_LOG_LEVEL_INFO = 3,
    MKAH_LOG_LEVEL_DEBUG = 4,
    MKAH_LOG_LEVEL_TRACE = 5,
}

/// Maps a raw `mkah_log_level_t` value read from C memory.
fn level_filter_from_raw(value: u32) -> Option<LevelFilter> {
    let level = match value {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => return None,
    };
    Some(level)
}

impl From<Level> for mkah_log_level_t {
    fn from(value: Level) -> Self {
        match value {
            Level::Error => mkah_log_level_t::MKAH_LOG_LEVEL_ERROR,
            Level::Warn => mkah_log_level_t::MKAH_LOG_LEVEL_WARN,
            Level::Info => mkah_log_level_t::MKAH_LOG_LEVEL_INFO,
            Level::Debug => mkah_log_level_t::MKAH_LOG_LEVEL_DEBUG,
            Level::Trace => mkah_log_level_t::MKAH_LOG_LEVEL_TRACE,
        }
    }
}

/// Structured log record delivered to a C callback.
///
/// String pointers are only valid for the duration of the callback and must not be retained.
/// `module_path` and `file` may be null when unavailable. `line` is 0 when unknown.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct mkah_log_record_t {
    pub level: mkah_log_level_t,
    pub target: *const c_char,
    pub message: *const c_char,
    pub module_path: *const c_char,
    pub file: *const c_char,
    pub line: u32,
}

/// Callback invoked for each log record emitted by the helper.
///
/// The callback may be invoked from any thread, including the descriptor worker.
#[allow(non_camel_case_types)]
pub type mkah_log_callback_t =
    Option<extern "C" fn(record: *const mkah_log_record_t, user_data: *mut c_void)>;

/// Configuration for initializing helper logging.
///
/// `level` holds an `mkah_log_level_t` value.
/// If `filter` is non-null, it is interpreted as an `RUST_LOG`-style filter string and
/// overrides `level`. If `filter` is null and `RUST_LOG` is set in the environment, the
/// environment value is used. Otherwise `level` is applied to the helper's own records.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct mkah_log_config_t {
    pub level: u32,
    pub filter: *const c_char,
    pub callback: mkah_log_callback_t,
    pub user_data: *mut c_void,
}

#[derive(Clone, Debug, PartialEq)]
struct TargetFilter {
    target: String,
    level: LevelFilter,
}

#[derive(Clone, Debug, PartialEq)]
struct LogFilter {
    default: LevelFilter,
    directives: Vec<TargetFilter>,
}

impl LogFilter {
    fn default_for_level(level: LevelFilter) -> Self {
        Self {
            default: LevelFilter::Off,
            directives: vec![TargetFilter {
                target: CRATE_TARGET.to_string(),
                level,
            }],
        }
    }

    fn parse(spec: &str) -> Result<Self, String> {
        let mut default = LevelFilter::Off;
        let mut directives = Vec::new();

        for (index, raw) in spec.split(',').enumerate() {
            let directive = raw.trim();
            if directive.is_empty() {
                continue;
            }
            let (left, right) = match directive.split_once('=') {
                Some((left, right)) => (left.trim(), Some(right.trim())),
                None => (directive, None),
            };

            if left.is_empty() {
                return Err(format!("empty log directive at position {index}"));
            }

            match right {
                Some("") => return Err(format!("missing log level for target `{left}`")),
                Some(level_str) => {
                    let level = parse_level(level_str)
                        .ok_or_else(|| format!("invalid level `{level_str}`"))?;
                    directives.push(TargetFilter {
                        target: left.to_string(),
                        level,
                    });
                }
                None => match parse_level(left) {
                    Some(level) => default = level,
                    None => directives.push(TargetFilter {
                        target: left.to_string(),
                        level: LevelFilter::Trace,
                    }),
                },
            }
        }

        Ok(Self { default, directives })
    }

    fn enabled(&self, metadata: &Metadata) -> bool {
        let target = metadata.target();
        let mut best_level = self.default;
        let mut best_len = 0usize;

        for directive in &self.directives {
            if target.starts_with(&directive.target) && directive.target.len() >= best_len {
                best_len = directive.target.len();
                best_level = directive.level;
            }
        }

        metadata.level().to_level_filter() <= best_level
    }

    fn max_level(&self) -> LevelFilter {
        self.directives
            .iter()
            .map(|directive| directive.level)
            .fold(self.default, std::cmp::max)
    }
}

struct LoggerConfig {
    filter: LogFilter,
    callback: mkah_log_callback_t,
    user_data: usize,
}

struct HelperLogger {
    config: RwLock<LoggerConfig>,
}

impl HelperLogger {
    fn new() -> Self {
        Self {
            config: RwLock::new(LoggerConfig {
                filter: LogFilter::default_for_level(LevelFilter::Info),
                callback: None,
                user_data: 0,
            }),
        }
    }

    fn update(&self, config: LoggerConfig) {
        let mut guard = self.config.write().unwrap_or_else(|err| err.into_inner());
        *guard = config;
    }

    fn with_config<T>(&self, f: impl FnOnce(&LoggerConfig) -> T) -> T {
        let guard = self.config.read().unwrap_or_else(|err| err.into_inner());
        f(&guard)
    }
}

impl Log for HelperLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.with_config(|config| config.filter.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        let (callback, user_data, enabled) = self.with_config(|config| {
            (
                config.callback,
                config.user_data,
                config.filter.enabled(record.metadata()),
            )
        });

        if !enabled {
            return;
        }

        match callback {
            Some(callback) => {
                let target = cstring_from_str_lossy(record.target());
                let message = cstring_from_str_lossy(&record.args().to_string());
                let module_path = record.module_path().map(cstring_from_str_lossy);
                let file = record.file().map(cstring_from_str_lossy);
                let c_record = mkah_log_record_t {
                    level: record.level().into(),
                    target: target.as_ptr(),
                    message: message.as_ptr(),
                    module_path: module_path.as_ref().map_or(ptr::null(), |value| value.as_ptr()),
                    file: file.as_ref().map_or(ptr::null(), |value| value.as_ptr()),
                    line: record.line().unwrap_or(0),
                };
                callback(&c_record, user_data as *mut c_void);
            }
            None => write_platform(record),
        }
    }

    fn flush(&self) {}
}

#[cfg(target_os = "android")]
fn write_platform(record: &Record) {
    use android_log_sys::{LogPriority, __android_log_write};
    use std::os::raw::c_int;

    let priority = match record.level() {
        Level::Error => LogPriority::ERROR,
        Level::Warn => LogPriority::WARN,
        Level::Info => LogPriority::INFO,
        Level::Debug => LogPriority::DEBUG,
        Level::Trace => LogPriority::VERBOSE,
    };
    let message = cstring_from_str_lossy(&format!("{}: {}", record.target(), record.args()));
    // Safety: both strings are NUL-terminated and outlive the call.
    unsafe {
        __android_log_write(priority as c_int, c"media_kit".as_ptr(), message.as_ptr());
    }
}

#[cfg(not(target_os = "android"))]
fn write_platform(record: &Record) {
    eprintln!("{} {}: {}", record.level(), record.target(), record.args());
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

fn read_optional_cstr(value: *const c_char) -> Option<String> {
    if value.is_null() {
        return None;
    }
    // Safety: caller guarantees a valid, NUL-terminated C string.
    let cstr = unsafe { CStr::from_ptr(value) };
    Some(cstr.to_string_lossy().into_owned())
}

fn resolve_filter(config: Option<&mkah_log_config_t>) -> Result<LogFilter, String> {
    let level = match config {
        Some(config) => level_filter_from_raw(config.level)
            .ok_or_else(|| format!("unknown log level {}", config.level))?,
        None => LevelFilter::Info,
    };

    if let Some(filter) = config.and_then(|config| read_optional_cstr(config.filter)) {
        return LogFilter::parse(&filter).map_err(|err| format!("invalid log filter `{filter}`: {err}"));
    }

    if let Ok(filter) = std::env::var("RUST_LOG") {
        return LogFilter::parse(&filter)
            .map_err(|err| format!("invalid RUST_LOG value `{filter}`: {err}"));
    }

    Ok(LogFilter::default_for_level(level))
}

fn ensure_logger() -> Result<(), &'static str> {
    LOGGER_INIT.call_once(|| {
        if log::set_logger(&*HELPER_LOGGER).is_ok() {
            LOGGER_STATE.store(LOGGER_STATE_READY, Ordering::SeqCst);
        } else {
            LOGGER_STATE.store(LOGGER_STATE_FAILED, Ordering::SeqCst);
        }
    });

    match LOGGER_STATE.load(Ordering::SeqCst) {
        LOGGER_STATE_READY => Ok(()),
        LOGGER_STATE_FAILED => Err("logging already initialized by another logger"),
        LOGGER_STATE_UNINIT => Err("logging failed to initialize"),
        _ => Err("logging is in an unknown state"),
    }
}

/// Installs the default logger unless the host already configured one.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn ensure_default() {
    if LOGGER_CONFIGURED.load(Ordering::SeqCst) {
        return;
    }
    let Ok(filter) = resolve_filter(None) else {
        return;
    };
    if ensure_logger().is_ok() {
        log::set_max_level(filter.max_level());
        HELPER_LOGGER.update(LoggerConfig {
            filter,
            callback: None,
            user_data: 0,
        });
        LOGGER_CONFIGURED.store(true, Ordering::SeqCst);
    }
}

/// Initializes default logging configuration values.
///
/// The defaults select INFO logging for the helper and use no callback.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_log_config_init(config: *mut mkah_log_config_t) {
    if config.is_null() {
        return;
    }
    // Safety: caller provided a writable config pointer.
    unsafe {
        *config = mkah_log_config_t {
            level: mkah_log_level_t::MKAH_LOG_LEVEL_INFO as u32,
            filter: ptr::null(),
            callback: None,
            user_data: ptr::null_mut(),
        };
    }
}

/// Initializes logging for the helper.
///
/// If `config` is null, defaults are used. This function may be called multiple
/// times to update the logging configuration after initialization.
#[unsafe(no_mangle)]
pub extern "C" fn mkah_log_init(
    config: *const mkah_log_config_t,
    out_error: *mut *mut mkah_error_t,
) -> bool {
    clear_error(out_error);

    // Safety: caller provided either null or a valid config pointer.
    let config = unsafe { config.as_ref() };
    let filter = match resolve_filter(config) {
        Ok(filter) => filter,
        Err(message) => {
            write_error(out_error, message);
            return false;
        }
    };

    if let Err(message) = ensure_logger() {
        write_error(out_error, message);
        return false;
    }

    let max_level = filter.max_level();
    HELPER_LOGGER.update(LoggerConfig {
        filter,
        callback: config.and_then(|config| config.callback),
        user_data: config.map_or(0, |config| config.user_data as usize),
    });
    log::set_max_level(max_level);
    LOGGER_CONFIGURED.store(true, Ordering::SeqCst);
    true
}
