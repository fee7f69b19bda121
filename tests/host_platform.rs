use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use mediakitandroidhelper::{
    materialize, open_file_descriptor, AssetSource, BaseDirectoryKind, ClassHandle, DeviceIdentity,
    EmulatorState, HelperConfig, HelperError, ManagedRuntime, Outcome, PlatformContext,
    ProcessRegistry,
};

/// Serves assets from a directory tree, the way a desktop build of the plugin would.
struct DirectorySource {
    root: PathBuf,
}

impl AssetSource for DirectorySource {
    fn read(&self, name: &str) -> Result<Vec<u8>, HelperError> {
        fs::read(self.root.join(name)).map_err(|_| HelperError::AssetNotFound(name.to_string()))
    }
}

/// Opens plain files instead of asking a content resolver.
struct FileRuntime;

impl ManagedRuntime for FileRuntime {
    fn raw_handle(&self) -> *mut c_void {
        NonNull::<c_void>::dangling().as_ptr()
    }

    fn open_file_descriptor(&self, _class: ClassHandle, uri: &str) -> Result<i32, HelperError> {
        use std::os::fd::IntoRawFd;

        let path = uri
            .strip_prefix("file://")
            .ok_or_else(|| HelperError::InvalidArgument(uri.to_string()))?;
        let file = fs::File::open(path)
            .map_err(|err| HelperError::MethodResolutionFailed(err.to_string()))?;
        Ok(file.into_raw_fd())
    }
}

struct HostContext {
    assets: PathBuf,
    files: PathBuf,
}

impl PlatformContext for HostContext {
    fn managed_runtime(&mut self) -> Result<Arc<dyn ManagedRuntime>, HelperError> {
        Ok(Arc::new(FileRuntime))
    }

    fn api_level(&mut self) -> Result<i32, HelperError> {
        Ok(33)
    }

    fn device_identity(&mut self) -> Result<DeviceIdentity, HelperError> {
        Ok(DeviceIdentity {
            brand: "google".to_string(),
            device: "panther".to_string(),
            fingerprint: "google/panther/panther:14".to_string(),
            hardware: "gs201".to_string(),
            model: "Pixel 7".to_string(),
            manufacturer: "Google".to_string(),
            product: "panther".to_string(),
        })
    }

    fn base_directory(&mut self, _kind: BaseDirectoryKind) -> Result<PathBuf, HelperError> {
        Ok(self.files.clone())
    }

    fn asset_source(&mut self) -> Result<Arc<dyn AssetSource>, HelperError> {
        Ok(Arc::new(DirectorySource {
            root: self.assets.clone(),
        }))
    }

    fn helper_class(&mut self) -> Result<ClassHandle, HelperError> {
        Ok(unsafe { ClassHandle::from_raw(NonNull::dangling()) })
    }
}

fn setup(root: &Path) -> ProcessRegistry {
    let assets = root.join("apk-assets");
    fs::create_dir_all(assets.join("flutter_assets/subs")).expect("create assets");
    fs::write(assets.join("flutter_assets/subs/en.srt"), "1\n00:00:01,000 --> 00:00:02,000\nHi\n")
        .expect("write asset");

    let registry = ProcessRegistry::new(HelperConfig::default());
    registry.initialize(&mut HostContext {
        assets,
        files: root.join("files"),
    });
    registry
}

#[test]
fn materialized_asset_can_be_opened_as_descriptor() {
    let temp_dir = tempfile::tempdir().expect("create tempdir");
    let registry = setup(temp_dir.path());

    assert_eq!(registry.api_level(), 33);
    assert_eq!(registry.emulator(), EmulatorState::No);

    let file = materialize(&registry, "flutter_assets/subs/en.srt").expect("materialize");
    assert_eq!(file.outcome, Outcome::Written);
    assert!(file.path.ends_with("com.alexmercerind.media_kit/flutter_assets_subs_en.srt"));

    let uri = format!("file://{}", file.path.display());
    let fd = open_file_descriptor(&registry, &uri).expect("open descriptor");
    assert!(fd >= 0);
    mediakitandroidhelper::close_file_descriptor(fd);
}

#[test]
fn later_asset_changes_are_not_picked_up() {
    let temp_dir = tempfile::tempdir().expect("create tempdir");
    let registry = setup(temp_dir.path());

    let first = materialize(&registry, "flutter_assets/subs/en.srt").expect("materialize");
    fs::write(
        temp_dir.path().join("apk-assets/flutter_assets/subs/en.srt"),
        "changed",
    )
    .expect("rewrite asset");

    let second = materialize(&registry, "flutter_assets/subs/en.srt").expect("materialize");
    assert_eq!(second.outcome, Outcome::AlreadyPresent);
    assert_ne!(fs::read_to_string(&second.path).unwrap(), "changed");
    assert_eq!(first.path, second.path);
}

#[test]
fn managed_failure_surfaces_as_error() {
    let temp_dir = tempfile::tempdir().expect("create tempdir");
    let registry = setup(temp_dir.path());

    let err = open_file_descriptor(&registry, "content://media/missing").unwrap_err();
    assert!(matches!(err, HelperError::InvalidArgument(_)));
}
