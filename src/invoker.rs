//! Synchronous call-outs into the managed runtime from arbitrary native threads.
//!
//! The calling thread may not be attached to the Java VM, so every call-out
//! runs on a fresh worker thread that attaches itself, and the caller blocks
//! on a one-shot channel until the worker answers.

use std::ffi::c_void;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::error::HelperError;
use crate::registry::{ClassHandle, ProcessRegistry};
use crate::runtime;

/// The embedding managed runtime.
pub trait ManagedRuntime: Send + Sync {
    /// Opaque handle handed to native consumers (`JavaVM*` on Android).
    fn raw_handle(&self) -> *mut c_void;

    /// Calls the helper class's static `openFileDescriptorJava(String): int`
    /// after attaching the current thread.
    fn open_file_descriptor(&self, class: ClassHandle, uri: &str) -> Result<i32, HelperError>;
}

/// Opens `uri` through the managed side and returns the raw descriptor.
///
/// Blocks until the worker answers, or until the configured timeout elapses.
pub fn open_file_descriptor(registry: &ProcessRegistry, uri: &str) -> Result<i32, HelperError> {
    let config = registry.config();
    if !config.supports_descriptor_open {
        return Err(HelperError::Unsupported("file descriptor open"));
    }
    let runtime = registry
        .runtime()
        .ok_or(HelperError::NotInitialized("runtime"))?;
    let class = registry.helper_class().ok_or_else(|| {
        HelperError::MethodResolutionFailed("helper class was not cached".to_string())
    })?;

    let uri = uri.to_owned();
    let fd = invoke_on_worker(
        move || runtime.open_file_descriptor(class, &uri),
        config.invoke_timeout,
    )?;
    debug!("opened file descriptor {fd}");
    Ok(fd)
}

/// Runs `task` on a dedicated thread and waits for its result.
pub(crate) fn invoke_on_worker<T, F>(task: F, timeout: Option<Duration>) -> Result<T, HelperError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HelperError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("media-kit-invoker".to_string())
        .spawn(move || {
            let _ = tx.send(task());
        })
        .map_err(|err| HelperError::AttachFailed(format!("failed to spawn worker: {err}")))?;

    match timeout {
        None => rx.blocking_recv().map_err(|_| HelperError::WorkerLost)?,
        Some(limit) => match runtime::block_on(async move { tokio::time::timeout(limit, rx).await }) {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HelperError::WorkerLost),
            Err(_) => {
                warn!("worker did not answer within {limit:?}; leaving it to finish");
                Err(HelperError::TimedOut(limit))
            }
        },
    }
}

/// Closes a descriptor previously returned by [`open_file_descriptor`].
///
/// Negative values are ignored. Closing the same descriptor twice is the
/// caller's bug.
#[cfg(unix)]
pub fn close_file_descriptor(fd: i32) {
    if fd < 0 {
        debug!("ignoring close of invalid descriptor {fd}");
        return;
    }
    // Safety: plain close(2); a stale descriptor only yields EBADF.
    if unsafe { libc::close(fd) } != 0 {
        debug!("close({fd}) failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
pub fn close_file_descriptor(fd: i32) {
    debug!("close_file_descriptor({fd}) is a no-op on this platform");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::config::HelperConfig;
    use crate::registry::tests::{FakeContext, FakeRuntime};
    use crate::registry::PlatformContext;

    struct SlowContext {
        inner: FakeContext,
        delay: Duration,
    }

    impl PlatformContext for SlowContext {
        fn managed_runtime(&mut self) -> Result<Arc<dyn ManagedRuntime>, HelperError> {
            Ok(Arc::new(FakeRuntime {
                handle: 0x2000,
                result: Ok(7),
                delay: Some(self.delay),
            }))
        }

        fn api_level(&mut self) -> Result<i32, HelperError> {
            self.inner.api_level()
        }

        fn device_identity(&mut self) -> Result<crate::device::DeviceIdentity, HelperError> {
            self.inner.device_identity()
        }

        fn base_directory(
            &mut self,
            kind: crate::config::BaseDirectoryKind,
        ) -> Result<PathBuf, HelperError> {
            self.inner.base_directory(kind)
        }

        fn asset_source(&mut self) -> Result<Arc<dyn crate::assets::AssetSource>, HelperError> {
            self.inner.asset_source()
        }

        fn helper_class(&mut self) -> Result<ClassHandle, HelperError> {
            self.inner.helper_class()
        }
    }

    #[test]
    fn returns_worker_result() {
        let registry = ProcessRegistry::default();
        registry.initialize(&mut FakeContext::default());
        assert_eq!(open_file_descriptor(&registry, "content://media/1").unwrap(), 42);
    }

    #[test]
    fn worker_error_is_propagated() {
        let registry = ProcessRegistry::default();
        registry.initialize(&mut FakeContext::default());
        let err = open_file_descriptor(&registry, "").unwrap_err();
        assert!(matches!(err, HelperError::InvalidArgument(_)));
    }

    #[test]
    fn unset_runtime_fails_without_blocking() {
        let registry = ProcessRegistry::default();
        let started = Instant::now();
        let err = open_file_descriptor(&registry, "file:///sdcard/a.mkv").unwrap_err();
        assert!(matches!(err, HelperError::NotInitialized("runtime")));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn disabled_by_configuration() {
        let registry = ProcessRegistry::new(HelperConfig {
            supports_descriptor_open: false,
            ..HelperConfig::default()
        });
        registry.initialize(&mut FakeContext::default());
        let err = open_file_descriptor(&registry, "file:///a").unwrap_err();
        assert!(matches!(err, HelperError::Unsupported(_)));
    }

    #[test]
    fn runs_on_a_named_worker() {
        let name = invoke_on_worker(
            || Ok(std::thread::current().name().map(str::to_owned)),
            None,
        )
        .unwrap();
        assert_eq!(name.as_deref(), Some("media-kit-invoker"));
    }

    #[test]
    fn panicking_worker_is_reported() {
        let result: Result<(), _> = invoke_on_worker(|| panic!("managed call blew up"), None);
        assert!(matches!(result, Err(HelperError::WorkerLost)));
    }

    #[test]
    fn stalled_worker_times_out() {
        let registry = ProcessRegistry::new(HelperConfig {
            invoke_timeout: Some(Duration::from_millis(20)),
            ..HelperConfig::default()
        });
        registry.initialize(&mut SlowContext {
            inner: FakeContext::default(),
            delay: Duration::from_millis(500),
        });
        let err = open_file_descriptor(&registry, "file:///slow").unwrap_err();
        assert!(matches!(err, HelperError::TimedOut(_)));
    }

    #[test]
    fn timeout_leaves_fast_calls_alone() {
        let result = invoke_on_worker(|| Ok(5), Some(Duration::from_secs(5)));
        assert_eq!(result.unwrap(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn close_releases_descriptor() {
        use std::os::fd::IntoRawFd;

        let file = tempfile::tempfile().expect("create tempfile");
        let fd = file.into_raw_fd();
        close_file_descriptor(fd);
        close_file_descriptor(-1);
    }

    #[cfg(unix)]
    #[test]
    fn closing_a_descriptor_that_is_not_open_is_harmless() {
        // Well above anything the concurrently running tests hold open.
        close_file_descriptor(9999);
        close_file_descriptor(i32::MAX);
        assert_eq!(unsafe { libc::fcntl(9999, libc::F_GETFD) }, -1);
    }
}
