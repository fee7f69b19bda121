//! Extract-once copies of packaged assets into private storage.
//!
//! An asset named `fonts/noto.ttf` ends up at
//! `<base>/<namespace>/fonts_noto.ttf`. Once that file exists it is never
//! rewritten, even if the packaged asset changes in a later build.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::WritePolicy;
use crate::error::HelperError;
use crate::registry::ProcessRegistry;

/// Read-only store of packaged files, addressed by slash-delimited name.
pub trait AssetSource: Send + Sync {
    /// Returns the whole asset. Missing assets yield
    /// [`HelperError::AssetNotFound`].
    fn read(&self, name: &str) -> Result<Vec<u8>, HelperError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Written,
    AlreadyPresent,
    /// Only produced under [`WritePolicy::Lenient`]; nothing usable is on disk.
    WriteFailed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaterializedFile {
    pub path: PathBuf,
    pub outcome: Outcome,
}

pub fn flatten_name(name: &str) -> String {
    name.replace('/', "_")
}

/// Makes sure a copy of `name` exists under the namespace directory and
/// returns its path.
pub fn materialize(registry: &ProcessRegistry, name: &str) -> Result<MaterializedFile, HelperError> {
    let source = registry
        .asset_source()
        .ok_or(HelperError::NotInitialized("asset source"))?;
    if registry.runtime().is_none() {
        return Err(HelperError::NotInitialized("runtime"));
    }
    let base = registry
        .base_directory()
        .ok_or(HelperError::NotInitialized("base directory"))?;

    let file_name = flatten_name(name);
    if matches!(file_name.as_str(), "" | "." | "..") {
        return Err(HelperError::InvalidArgument(format!("`{name}` is not an asset name")));
    }

    let config = registry.config();
    let bytes = source.read(name)?;
    debug!("asset {name}: {} bytes", bytes.len());

    let directory = base.join(&config.namespace);
    ensure_directory(&directory);

    let path = directory.join(file_name);
    if path.exists() {
        debug!("asset file exists: {}", path.display());
        return Ok(MaterializedFile {
            path,
            outcome: Outcome::AlreadyPresent,
        });
    }

    let outcome = match write_new(&path, &bytes) {
        Ok(true) => {
            debug!("asset file written: {}", path.display());
            Outcome::Written
        }
        Ok(false) => Outcome::AlreadyPresent,
        Err(err) => match config.write_policy {
            WritePolicy::Lenient => {
                warn!("{err}");
                Outcome::WriteFailed
            }
            WritePolicy::Strict => return Err(err),
        },
    };
    Ok(MaterializedFile { path, outcome })
}

fn ensure_directory(directory: &Path) {
    if directory.is_dir() {
        return;
    }
    debug!("creating asset directory {}", directory.display());
    if let Err(source) = fs::create_dir_all(directory) {
        let err = HelperError::DirectoryCreateFailed {
            path: directory.to_path_buf(),
            source,
        };
        warn!("{err}");
    }
}

/// Returns `Ok(false)` when someone else created the file first. A partial
/// file is removed so the next call starts over.
fn write_new(path: &Path, bytes: &[u8]) -> Result<bool, HelperError> {
    let write_failed = |source| HelperError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(write_failed(err)),
    };

    if let Err(err) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(write_failed(err));
    }
    Ok(true)
}

#[cfg(test)]
pub(crate) use tests::MemoryAssetSource;
