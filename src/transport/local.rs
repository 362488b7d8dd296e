//! Local disk chunk store
//!
//! On-disk layout under each disk root:
//!
//! ```text
//! {disk}/{hash_prefix}/{object_hash}/
//!     ├── xl.meta
//!     ├── chunk.1
//!     ├── ...
//!     └── chunk.{K+M}
//! ```
//!
//! Every file is written to a temporary sibling, fsynced and renamed into
//! place, so readers only ever see complete files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::object_dir;

/// Metadata file name inside an object directory
pub const META_FILE: &str = "xl.meta";

/// File name of a chunk; `index` is 1-based
pub fn chunk_file_name(index: usize) -> String {
    format!("chunk.{}", index)
}

/// File-level access to objects on locally mounted disks
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDiskStore;

impl LocalDiskStore {
    /// Directory holding one object on one disk
    pub fn object_path(disk: &Path, object_hash: u64) -> PathBuf {
        disk.join(object_dir(object_hash))
    }

    pub fn write_chunk(&self, disk: &Path, object_hash: u64, index: usize, data: &[u8]) -> Result<()> {
        let path = Self::object_path(disk, object_hash).join(chunk_file_name(index));
        atomic_write(&path, data)
    }

    pub fn read_chunk(&self, disk: &Path, object_hash: u64, index: usize) -> Result<Vec<u8>> {
        let path = Self::object_path(disk, object_hash).join(chunk_file_name(index));
        fs::read(&path).map_err(|e| Error::from_io(e, path.display()))
    }

    /// Remove one chunk file; NotFound if it does not exist
    pub fn delete_chunk(&self, disk: &Path, object_hash: u64, index: usize) -> Result<()> {
        let path = Self::object_path(disk, object_hash).join(chunk_file_name(index));
        fs::remove_file(&path).map_err(|e| Error::from_io(e, path.display()))
    }

    pub fn write_meta(&self, disk: &Path, object_hash: u64, data: &[u8]) -> Result<()> {
        let path = Self::object_path(disk, object_hash).join(META_FILE);
        atomic_write(&path, data)
    }

    pub fn read_meta(&self, disk: &Path, object_hash: u64) -> Result<Vec<u8>> {
        let path = Self::object_path(disk, object_hash).join(META_FILE);
        fs::read(&path).map_err(|e| Error::from_io(e, path.display()))
    }

    /// Remove the object directory; NotFound if it does not exist
    pub fn delete_object(&self, disk: &Path, object_hash: u64) -> Result<()> {
        let dir = Self::object_path(disk, object_hash);
        fs::remove_dir_all(&dir).map_err(|e| Error::from_io(e, dir.display()))?;
        debug!(path = %dir.display(), "Removed object directory");

        // Best effort: drop the prefix directory once it is empty
        if let Some(parent) = dir.parent() {
            let _ = fs::remove_dir(parent);
        }
        Ok(())
    }
}

/// Write `data` to `path` through a fsynced temporary file and a rename
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidArgument(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidArgument(format!("{} has no file name", path.display())))?;
    let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::from_io(e, path.display()));
    }

    // Persist the rename itself; not every platform allows opening a directory
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}
