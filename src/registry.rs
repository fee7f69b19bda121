//! Process-wide, write-once registry of values bridged from the managed side.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::{Arc, RwLock};

use log::{debug, warn};
use once_cell::sync::{Lazy, OnceCell};

use crate::assets::AssetSource;
use crate::config::{BaseDirectoryKind, HelperConfig};
use crate::device::{DeviceIdentity, EmulatorState};
use crate::error::HelperError;
use crate::invoker::ManagedRuntime;

static REGISTRY: Lazy<ProcessRegistry> = Lazy::new(ProcessRegistry::default);

/// The registry shared by every boundary entry point.
pub fn global() -> &'static ProcessRegistry {
    &REGISTRY
}

/// Global reference to a managed class, valid on every thread for the life of
/// the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassHandle(NonNull<c_void>);

// Safety: JNI global references may be used from any attached thread.
unsafe impl Send for ClassHandle {}
unsafe impl Sync for ClassHandle {}

impl ClassHandle {
    /// # Safety
    /// `raw` must be a global reference that is never deleted.
    pub unsafe fn from_raw(raw: NonNull<c_void>) -> Self {
        Self(raw)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Source of the values the registry caches.
///
/// On Android this wraps the `JNIEnv` and application `Context` handed to
/// `setApplicationContext`.
pub trait PlatformContext {
    fn managed_runtime(&mut self) -> Result<Arc<dyn ManagedRuntime>, HelperError>;
    fn api_level(&mut self) -> Result<i32, HelperError>;
    fn device_identity(&mut self) -> Result<DeviceIdentity, HelperError>;
    fn base_directory(&mut self, kind: BaseDirectoryKind) -> Result<PathBuf, HelperError>;
    fn asset_source(&mut self) -> Result<Arc<dyn AssetSource>, HelperError>;
    fn helper_class(&mut self) -> Result<ClassHandle, HelperError>;
}

/// Each field is filled at most once; the first successful writer wins and
/// concurrent initializers of the same field wait for it instead of repeating
/// the platform call.
#[derive(Default)]
pub struct ProcessRegistry {
    config: RwLock<HelperConfig>,
    runtime: OnceCell<Arc<dyn ManagedRuntime>>,
    api_level: OnceCell<i32>,
    emulator: OnceCell<bool>,
    base_directory: OnceCell<PathBuf>,
    asset_source: OnceCell<Arc<dyn AssetSource>>,
    helper_class: OnceCell<ClassHandle>,
}

impl ProcessRegistry {
    pub fn new(config: HelperConfig) -> Self {
        Self {
            config: RwLock::new(config),
            ..Self::default()
        }
    }

    pub fn configure(&self, config: HelperConfig) {
        if self.base_directory.get().is_some() {
            debug!("base directory already resolved; the configured kind takes effect next process");
        }
        let mut guard = self.config.write().unwrap_or_else(|err| err.into_inner());
        *guard = config;
    }

    pub fn config(&self) -> HelperConfig {
        self.config
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Fills every field that is still unset. Lookups that fail leave their
    /// field unset so a later call can try again.
    pub fn initialize(&self, context: &mut dyn PlatformContext) {
        let config = self.config();

        fill("runtime", &self.runtime, || context.managed_runtime());
        fill("api level", &self.api_level, || context.api_level());
        fill("emulator flag", &self.emulator, || {
            let identity = context.device_identity()?;
            debug!("device identity: {identity:?}");
            Ok(identity.is_emulator())
        });
        fill("base directory", &self.base_directory, || {
            context.base_directory(config.base_directory)
        });
        fill("asset source", &self.asset_source, || context.asset_source());
        if config.supports_descriptor_open {
            fill("helper class", &self.helper_class, || context.helper_class());
        }
    }

    pub fn runtime(&self) -> Option<Arc<dyn ManagedRuntime>> {
        self.runtime.get().cloned()
    }

    /// Raw runtime handle (`JavaVM*` on Android), null until initialized.
    pub fn runtime_handle(&self) -> *mut c_void {
        self.runtime
            .get()
            .map_or(ptr::null_mut(), |runtime| runtime.raw_handle())
    }

    /// `-1` until initialized.
    pub fn api_level(&self) -> i32 {
        self.api_level.get().copied().unwrap_or(-1)
    }

    pub fn emulator(&self) -> EmulatorState {
        self.emulator.get().copied().into()
    }

    pub fn base_directory(&self) -> Option<&Path> {
        self.base_directory.get().map(PathBuf::as_path)
    }

    pub fn asset_source(&self) -> Option<Arc<dyn AssetSource>> {
        self.asset_source.get().cloned()
    }

    pub fn helper_class(&self) -> Option<ClassHandle> {
        self.helper_class.get().copied()
    }
}

fn fill<T>(
    field: &'static str,
    cell: &OnceCell<T>,
    init: impl FnOnce() -> Result<T, HelperError>,
) {
    if cell.get().is_some() {
        return;
    }
    match cell.get_or_try_init(init) {
        Ok(_) => debug!("{field} initialized"),
        Err(err) => warn!("{field} unavailable: {err}"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::assets::MemoryAssetSource;

    pub(crate) struct FakeRuntime {
        pub(crate) handle: usize,
        pub(crate) result: Result<i32, &'static str>,
        pub(crate) delay: Option<std::time::Duration>,
    }

    impl ManagedRuntime for FakeRuntime {
        fn raw_handle(&self) -> *mut c_void {
            self.handle as *mut c_void
        }

        fn open_file_descriptor(&self, _class: ClassHandle, uri: &str) -> Result<i32, HelperError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if uri.is_empty() {
                return Err(HelperError::InvalidArgument("empty uri".to_string()));
            }
            self.result
                .map_err(|message| HelperError::MethodResolutionFailed(message.to_string()))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeContext {
        pub(crate) base: PathBuf,
        pub(crate) assets: HashMap<String, Vec<u8>>,
        pub(crate) identity: DeviceIdentity,
        pub(crate) fail_base_directory: bool,
        pub(crate) fail_runtime: bool,
        pub(crate) runtime_calls: Arc<AtomicUsize>,
        pub(crate) requested_kind: Option<BaseDirectoryKind>,
    }

    impl PlatformContext for FakeContext {
        fn managed_runtime(&mut self) -> Result<Arc<dyn ManagedRuntime>, HelperError> {
            self.runtime_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_runtime {
                return Err(HelperError::AttachFailed("GetJavaVM failed".to_string()));
            }
            Ok(Arc::new(FakeRuntime {
                handle: 0x1000,
                result: Ok(42),
                delay: None,
            }))
        }

        fn api_level(&mut self) -> Result<i32, HelperError> {
            Ok(34)
        }

        fn device_identity(&mut self) -> Result<DeviceIdentity, HelperError> {
            Ok(self.identity.clone())
        }

        fn base_directory(&mut self, kind: BaseDirectoryKind) -> Result<PathBuf, HelperError> {
            self.requested_kind = Some(kind);
            if self.fail_base_directory {
                return Err(HelperError::Platform("getExternalFilesDir returned null".to_string()));
            }
            Ok(self.base.clone())
        }

        fn asset_source(&mut self) -> Result<Arc<dyn AssetSource>, HelperError> {
            Ok(Arc::new(MemoryAssetSource::new(self.assets.clone())))
        }

        fn helper_class(&mut self) -> Result<ClassHandle, HelperError> {
            Ok(unsafe { ClassHandle::from_raw(NonNull::dangling()) })
        }
    }

    #[test]
    fn reads_before_initialize_return_sentinels() {
        let registry = ProcessRegistry::default();
        assert!(registry.runtime().is_none());
        assert!(registry.runtime_handle().is_null());
        assert_eq!(registry.api_level(), -1);
        assert_eq!(registry.emulator(), EmulatorState::Unknown);
        assert!(!registry.emulator().as_bool());
        assert!(registry.base_directory().is_none());
        assert!(registry.asset_source().is_none());
        assert!(registry.helper_class().is_none());
    }

    #[test]
    fn initialize_populates_every_field() {
        let registry = ProcessRegistry::default();
        let mut context = FakeContext {
            base: PathBuf::from("/data/files"),
            identity: DeviceIdentity {
                hardware: "ranchu".to_string(),
                ..DeviceIdentity::default()
            },
            ..FakeContext::default()
        };
        registry.initialize(&mut context);

        assert_eq!(registry.runtime_handle() as usize, 0x1000);
        assert_eq!(registry.api_level(), 34);
        assert_eq!(registry.emulator(), EmulatorState::Yes);
        assert_eq!(registry.base_directory(), Some(Path::new("/data/files")));
        assert!(registry.asset_source().is_some());
        assert!(registry.helper_class().is_some());
        assert_eq!(context.requested_kind, Some(BaseDirectoryKind::External));
    }

    #[test]
    fn first_writer_wins() {
        let registry = ProcessRegistry::default();
        let mut first = FakeContext {
            base: PathBuf::from("/first"),
            ..FakeContext::default()
        };
        registry.initialize(&mut first);

        let mut second = FakeContext {
            base: PathBuf::from("/second"),
            runtime_calls: Arc::clone(&first.runtime_calls),
            ..FakeContext::default()
        };
        registry.initialize(&mut second);

        assert_eq!(registry.base_directory(), Some(Path::new("/first")));
        assert_eq!(first.runtime_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.requested_kind, None);
    }

    #[test]
    fn failed_lookup_is_retried_later() {
        let registry = ProcessRegistry::default();
        let mut failing = FakeContext {
            fail_base_directory: true,
            ..FakeContext::default()
        };
        registry.initialize(&mut failing);
        assert!(registry.base_directory().is_none());
        assert!(registry.runtime().is_some());

        let mut working = FakeContext {
            base: PathBuf::from("/later"),
            ..FakeContext::default()
        };
        registry.initialize(&mut working);
        assert_eq!(registry.base_directory(), Some(Path::new("/later")));
    }

    #[test]
    fn configured_kind_and_descriptor_support_are_honoured() {
        let registry = ProcessRegistry::new(HelperConfig {
            base_directory: BaseDirectoryKind::Internal,
            supports_descriptor_open: false,
            ..HelperConfig::default()
        });
        let mut context = FakeContext::default();
        registry.initialize(&mut context);

        assert_eq!(context.requested_kind, Some(BaseDirectoryKind::Internal));
        assert!(registry.helper_class().is_none());
    }

    #[test]
    fn concurrent_initialize_attaches_once() {
        let registry = Arc::new(ProcessRegistry::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    let mut context = FakeContext {
                        runtime_calls: calls,
                        ..FakeContext::default()
                    };
                    registry.initialize(&mut context);
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
