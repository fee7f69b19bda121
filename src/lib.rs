//! Native helper for media_kit on Android.
//!
//! Exposes packaged assets as plain files, the process `JavaVM`, a few device
//! facts and content-URI file descriptors to the Dart FFI layer and to Java.

pub mod assets;
pub mod config;
pub mod device;
pub mod error;
pub mod exports;
pub mod invoker;
pub mod logging;
pub mod registry;

#[cfg(target_os = "android")]
mod android;
mod runtime;

pub use assets::{materialize, AssetSource, MaterializedFile, Outcome};
pub use config::{BaseDirectoryKind, HelperConfig, WritePolicy};
pub use device::{classify, DeviceIdentity, EmulatorState};
pub use error::HelperError;
pub use invoker::{close_file_descriptor, open_file_descriptor, ManagedRuntime};
pub use registry::{ClassHandle, PlatformContext, ProcessRegistry};
