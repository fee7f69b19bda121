//! JNI entry points and the Android implementations of the registry's
//! collaborators.

#![allow(non_snake_case)]

use std::ffi::{c_void, CString};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock};

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jboolean, jint, jlong, jobject, jstring, JNI_FALSE, JNI_TRUE};
use jni::{JNIEnv, JavaVM};
use log::{debug, error, warn};
use ndk::asset::AssetManager;

use crate::assets::AssetSource;
use crate::config::BaseDirectoryKind;
use crate::device::DeviceIdentity;
use crate::error::HelperError;
use crate::exports;
use crate::invoker::ManagedRuntime;
use crate::logging;
use crate::registry::{self, ClassHandle, PlatformContext};

const HELPER_CLASS: &str = "com/alexmercerind/mediakitandroidhelper/MediaKitAndroidHelper";
const OPEN_FD_METHOD: &str = "openFileDescriptorJava";
const OPEN_FD_SIGNATURE: &str = "(Ljava/lang/String;)I";

static ANDROID_CONTEXT_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Turns a JNI failure into a [`HelperError`], clearing any pending Java
/// exception so later JNI calls on this thread stay valid.
fn jni_call<T>(
    env: &mut JNIEnv,
    what: &str,
    result: jni::errors::Result<T>,
) -> Result<T, HelperError> {
    result.map_err(|err| {
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }
        HelperError::Platform(format!("{what}: {err}"))
    })
}

/// Leaks a global reference for the life of the process.
fn leak_global(global: GlobalRef) -> Option<NonNull<c_void>> {
    let raw = global.as_obj().as_raw();
    std::mem::forget(global);
    NonNull::new(raw.cast())
}

struct JniRuntime {
    vm: JavaVM,
}

impl ManagedRuntime for JniRuntime {
    fn raw_handle(&self) -> *mut c_void {
        self.vm.get_java_vm_pointer().cast()
    }

    fn open_file_descriptor(&self, class: ClassHandle, uri: &str) -> Result<i32, HelperError> {
        let mut env = self
            .vm
            .attach_current_thread()
            .map_err(|err| HelperError::AttachFailed(err.to_string()))?;

        let uri = env
            .new_string(uri)
            .map_err(|err| HelperError::InvalidArgument(format!("uri: {err}")))?;
        // Safety: the handle is a global reference that lives as long as the process.
        let class = unsafe { JClass::from_raw(class.as_ptr().cast()) };
        let result = env
            .call_static_method(&class, OPEN_FD_METHOD, OPEN_FD_SIGNATURE, &[JValue::from(&uri)])
            .and_then(|value| value.i());

        result.map_err(|err| {
            if env.exception_check().unwrap_or(false) {
                let _ = env.exception_describe();
                let _ = env.exception_clear();
            }
            HelperError::MethodResolutionFailed(format!("{OPEN_FD_METHOD}: {err}"))
        })
    }
}

struct NdkAssetSource {
    manager: AssetManager,
    // Keeps the Java AssetManager, and with it the native one, alive.
    _java_manager: GlobalRef,
}

// Safety: AAssetManager may be used from any thread; every AAsset opened from
// it stays on the calling thread.
unsafe impl Send for NdkAssetSource {}
unsafe impl Sync for NdkAssetSource {}

impl AssetSource for NdkAssetSource {
    fn read(&self, name: &str) -> Result<Vec<u8>, HelperError> {
        let c_name = CString::new(name)
            .map_err(|_| HelperError::InvalidArgument(format!("asset name `{name}` contains NUL")))?;
        let mut asset = self
            .manager
            .open(&c_name)
            .ok_or_else(|| HelperError::AssetNotFound(name.to_string()))?;

        let mut buffer = Vec::with_capacity(asset.length());
        asset
            .read_to_end(&mut buffer)
            .map_err(|source| HelperError::AssetRead {
                name: name.to_string(),
                source,
            })?;
        Ok(buffer)
    }
}

/// The `JNIEnv` and application `Context` handed to `setApplicationContext`.
struct JniPlatformContext<'a, 'local> {
    env: &'a mut JNIEnv<'local>,
    context: &'a JObject<'local>,
}

impl JniPlatformContext<'_, '_> {
    fn build_string(&mut self, class: &JClass, field: &str) -> Result<String, HelperError> {
        let value = self
            .env
            .get_static_field(class, field, "Ljava/lang/String;")
            .and_then(|value| value.l());
        let value = jni_call(self.env, field, value)?;
        if value.is_null() {
            return Ok(String::new());
        }
        let value = JString::from(value);
        let text = self.env.get_string(&value).map(String::from);
        let text = jni_call(self.env, field, text)?;
        let _ = self.env.delete_local_ref(value);
        Ok(text)
    }

    fn absolute_path(&mut self, file: JObject) -> Result<PathBuf, HelperError> {
        let path = self
            .env
            .call_method(&file, "getAbsolutePath", "()Ljava/lang/String;", &[])
            .and_then(|value| value.l());
        let path = JString::from(jni_call(self.env, "getAbsolutePath", path)?);
        let text = self.env.get_string(&path).map(String::from);
        let text = jni_call(self.env, "getAbsolutePath", text)?;
        let _ = self.env.delete_local_ref(path);
        let _ = self.env.delete_local_ref(file);
        Ok(PathBuf::from(text))
    }
}

impl PlatformContext for JniPlatformContext<'_, '_> {
    fn managed_runtime(&mut self) -> Result<Arc<dyn ManagedRuntime>, HelperError> {
        let vm = self.env.get_java_vm();
        let vm = jni_call(self.env, "GetJavaVM", vm)?;
        Ok(Arc::new(JniRuntime { vm }))
    }

    fn api_level(&mut self) -> Result<i32, HelperError> {
        let class = self.env.find_class("android/os/Build$VERSION");
        let class = jni_call(self.env, "android.os.Build$VERSION", class)?;
        let level = self
            .env
            .get_static_field(&class, "SDK_INT", "I")
            .and_then(|value| value.i());
        jni_call(self.env, "SDK_INT", level)
    }

    fn device_identity(&mut self) -> Result<DeviceIdentity, HelperError> {
        let class = self.env.find_class("android/os/Build");
        let class = jni_call(self.env, "android.os.Build", class)?;
        Ok(DeviceIdentity {
            brand: self.build_string(&class, "BRAND")?,
            device: self.build_string(&class, "DEVICE")?,
            fingerprint: self.build_string(&class, "FINGERPRINT")?,
            hardware: self.build_string(&class, "HARDWARE")?,
            model: self.build_string(&class, "MODEL")?,
            manufacturer: self.build_string(&class, "MANUFACTURER")?,
            product: self.build_string(&class, "PRODUCT")?,
        })
    }

    fn base_directory(&mut self, kind: BaseDirectoryKind) -> Result<PathBuf, HelperError> {
        let file = match kind {
            BaseDirectoryKind::External => self.env.call_method(
                self.context,
                "getExternalFilesDir",
                "(Ljava/lang/String;)Ljava/io/File;",
                &[JValue::Object(&JObject::null())],
            ),
            BaseDirectoryKind::Internal => {
                self.env
                    .call_method(self.context, "getFilesDir", "()Ljava/io/File;", &[])
            }
        }
        .and_then(|value| value.l());
        let file = jni_call(self.env, "files directory", file)?;
        if file.is_null() {
            return Err(HelperError::Platform(format!("{kind:?} files directory is unavailable")));
        }
        self.absolute_path(file)
    }

    fn asset_source(&mut self) -> Result<Arc<dyn AssetSource>, HelperError> {
        let manager = self
            .env
            .call_method(
                self.context,
                "getAssets",
                "()Landroid/content/res/AssetManager;",
                &[],
            )
            .and_then(|value| value.l());
        let manager = jni_call(self.env, "getAssets", manager)?;
        let global = self.env.new_global_ref(&manager);
        let global = jni_call(self.env, "NewGlobalRef", global)?;
        let _ = self.env.delete_local_ref(manager);

        // Safety: both pointers come from the live env and a global reference.
        let raw = unsafe {
            ndk_sys::AAssetManager_fromJava(self.env.get_raw().cast(), global.as_obj().as_raw().cast())
        };
        let raw = NonNull::new(raw)
            .ok_or_else(|| HelperError::Platform("AAssetManager_fromJava returned null".to_string()))?;
        // Safety: the native manager lives as long as `global`, which the source owns.
        let manager = unsafe { AssetManager::from_ptr(raw) };
        Ok(Arc::new(NdkAssetSource {
            manager,
            _java_manager: global,
        }))
    }

    fn helper_class(&mut self) -> Result<ClassHandle, HelperError> {
        // Resolved here because only the Java call-in thread sees the app class loader.
        let class = self.env.find_class(HELPER_CLASS);
        let class = jni_call(self.env, HELPER_CLASS, class)?;
        let global = self.env.new_global_ref(&class);
        let global = jni_call(self.env, "NewGlobalRef", global)?;
        let raw = leak_global(global)
            .ok_or_else(|| HelperError::MethodResolutionFailed(HELPER_CLASS.to_string()))?;
        // Safety: the reference was leaked above and is never deleted.
        Ok(unsafe { ClassHandle::from_raw(raw) })
    }
}

/// Shares the VM and application context with other native crates in the
/// process through `ndk-context`.
fn publish_ndk_context(env: &mut JNIEnv, context: &JObject) {
    if ANDROID_CONTEXT_INITIALIZED.get().is_some() {
        return;
    }
    let vm = registry::global().runtime_handle();
    if vm.is_null() {
        return;
    }
    let global = env.new_global_ref(context);
    let Some(context) = jni_call(env, "NewGlobalRef", global).ok().and_then(leak_global) else {
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // Safety: the VM pointer is valid for the process and the context is a leaked global.
        unsafe {
            ndk_context::initialize_android_context(vm, context.as_ptr());
        }
    }));
    match result {
        Ok(()) => {
            let _ = ANDROID_CONTEXT_INITIALIZED.set(());
        }
        Err(_) => warn!("ndk-context was already initialized by another library"),
    }
}

pub(crate) fn initialize_from_raw(java_vm: *mut c_void, context: *mut c_void) -> Result<(), HelperError> {
    // Safety: the caller passes the process JavaVM.
    let vm = unsafe { JavaVM::from_raw(java_vm.cast()) }
        .map_err(|err| HelperError::Platform(format!("JavaVM: {err}")))?;
    let mut env = vm
        .attach_current_thread()
        .map_err(|err| HelperError::AttachFailed(err.to_string()))?;
    // Safety: the caller passes a global reference to a Context; it is never deleted here.
    let context = unsafe { JObject::from_raw(context.cast()) };

    registry::global().initialize(&mut JniPlatformContext {
        env: &mut env,
        context: &context,
    });
    publish_ndk_context(&mut env, &context);
    Ok(())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_setApplicationContext<
    'local,
>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    context: JObject<'local>,
) {
    logging::ensure_default();
    if context.is_null() {
        error!("setApplicationContext called with a null context");
        return;
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut platform = JniPlatformContext {
            env: &mut env,
            context: &context,
        };
        registry::global().initialize(&mut platform);
        publish_ndk_context(&mut env, &context);
    }));
    match result {
        Ok(()) => debug!("application context applied"),
        Err(_) => error!("panic while applying application context"),
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_copyAssetToFilesDir<
    'local,
>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    asset_name: JString<'local>,
) -> jstring {
    let path = match env.get_string(&asset_name) {
        Ok(name) => exports::copy_asset_to_dir(&String::from(name)),
        Err(err) => {
            error!("copy asset: {err}");
            String::new()
        }
    };
    env.new_string(path)
        .map(JString::into_raw)
        .unwrap_or(ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_openFileDescriptor<
    'local,
>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    uri: JString<'local>,
) -> jint {
    match env.get_string(&uri) {
        Ok(uri) => exports::open_file_descriptor(&String::from(uri)),
        Err(err) => {
            error!("open file descriptor: {err}");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_closeFileDescriptor<
    'local,
>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    fd: jint,
) {
    crate::invoker::close_file_descriptor(fd);
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_isEmulator<
    'local,
>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    if registry::global().emulator().as_bool() {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_getAPILevel<
    'local,
>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jint {
    registry::global().api_level()
}

/// Pins `object` so native code can hold it past the current JNI frame.
/// Returns 0 on failure.
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_newGlobalObjectRef<
    'local,
>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    object: JObject<'local>,
) -> jlong {
    match env.new_global_ref(object) {
        Ok(global) => leak_global(global).map_or(0, |raw| raw.as_ptr() as jlong),
        Err(err) => {
            error!("newGlobalObjectRef: {err}");
            0
        }
    }
}

/// Releases a reference returned by `newGlobalObjectRef`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_alexmercerind_mediakitandroidhelper_MediaKitAndroidHelper_deleteGlobalObjectRef<
    'local,
>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    reference: jlong,
) {
    if reference == 0 {
        return;
    }
    let raw_env = env.get_raw();
    // Safety: `reference` came from newGlobalObjectRef and the env belongs to this thread.
    unsafe {
        if let Some(delete) = (**raw_env).DeleteGlobalRef {
            delete(raw_env, reference as jobject);
        }
    }
}
