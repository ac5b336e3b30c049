//! Index directory management.
//!
//! ```text
//! <root>/
//! ├─ LOCK                 # Advisory lock held by the registry
//! ├─ KEYTYPES             # Key types known at the last startup
//! └─ <key-type-name>/
//!    ├─ VERSION           # Version marker
//!    └─ storage.dat       # Record log
//! ```
//!
//! Metadata files are written with the write-then-rename pattern so a crash
//! leaves either the old or the new content.

use crate::error::{CoreError, CoreResult};
use crate::manifest::KeyTypeManifest;
use crate::version::VersionMarker;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MANIFEST_FILE: &str = "KEYTYPES";
const VERSION_FILE: &str = "VERSION";
const STORAGE_FILE: &str = "storage.dat";
const TEMP_SUFFIX: &str = ".tmp";

/// The root directory of an index registry.
///
/// Holds an exclusive advisory lock on `<root>/LOCK` for its lifetime.
#[derive(Debug)]
pub struct IndexDir {
    path: PathBuf,
    _lock_file: File,
}

impl IndexDir {
    /// Opens or creates the index directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexLocked`] if another registry holds the
    /// lock, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "index root is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::IndexLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding one key type's files.
    #[must_use]
    pub fn key_type_dir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Returns the path of a key type's record log.
    #[must_use]
    pub fn storage_path(&self, name: &str) -> PathBuf {
        self.key_type_dir(name).join(STORAGE_FILE)
    }

    /// Returns the path of a key type's version marker.
    #[must_use]
    pub fn version_path(&self, name: &str) -> PathBuf {
        self.key_type_dir(name).join(VERSION_FILE)
    }

    /// Reads a key type's version marker.
    ///
    /// Returns `Ok(None)` if the marker does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn read_marker(&self, name: &str) -> CoreResult<Option<VersionMarker>> {
        let path = self.version_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        VersionMarker::decode(&data).map(Some)
    }

    /// Writes a key type's version marker atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    pub fn write_marker(&self, name: &str, marker: &VersionMarker) -> CoreResult<()> {
        let dir = self.key_type_dir(name);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &self.version_path(name), &marker.encode())
    }

    /// Rewrites the marker only if it is missing, unreadable, or records a
    /// different version.
    ///
    /// Returns true if the marker was rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    pub fn ensure_marker(&self, name: &str, version: i32) -> CoreResult<bool> {
        match self.read_marker(name) {
            Ok(Some(marker)) if marker.matches(version) => Ok(false),
            _ => {
                self.write_marker(name, &VersionMarker::now(version))?;
                Ok(true)
            }
        }
    }

    /// Deletes all on-disk data of a key type, marker included.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists and cannot be removed.
    pub fn remove_key_type(&self, name: &str) -> CoreResult<()> {
        let dir = self.key_type_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            self.sync_directory()?;
        }
        Ok(())
    }

    /// Loads the key type manifest.
    ///
    /// Returns `None` for a new directory or an unreadable manifest.
    pub fn load_manifest(&self) -> Option<KeyTypeManifest> {
        let data = fs::read(self.path.join(MANIFEST_FILE)).ok()?;
        match KeyTypeManifest::decode(&data) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable key type manifest");
                None
            }
        }
    }

    /// Lists the subdirectories that hold a version marker.
    ///
    /// Used to find key types on disk when the manifest cannot be read.
    pub fn scan_key_types(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to scan index directory");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(VERSION_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    /// Saves the key type manifest atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written.
    pub fn save_manifest(&self, manifest: &KeyTypeManifest) -> CoreResult<()> {
        write_atomic(&self.path, &self.path.join(MANIFEST_FILE), &manifest.encode())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        sync_dir(&self.path)
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp_name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(TEMP_SUFFIX);
    let temp = target.with_file_name(temp_name);

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, target)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
