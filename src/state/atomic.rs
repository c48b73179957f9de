//! Durable file replacement
//!
//! A file is replaced by writing `<name>.tmp` next to it, syncing it, renaming it
//! over the target and then syncing the parent directory. Readers see either the
//! old or the new contents, never a partial write.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sync a file's contents and metadata to disk
pub(crate) fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Sync a directory so that renames and creations inside it survive power loss
#[cfg(unix)]
pub(crate) fn fsync_dir(dir: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir)?;
    dir.sync_all()
}

/// Directories cannot be opened for syncing on this platform
#[cfg(not(unix))]
pub(crate) fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Temp file used while replacing `path`
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `bytes`
///
/// Creates the parent directory if needed. On failure the temp file is removed
/// and the previous contents of `path` are untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let tmp = tmp_path(path);
    let result = write_and_rename(&tmp, path, bytes);
    if result.is_err() {
        // May not exist if open() was what failed
        let _ = std::fs::remove_file(&tmp);
        return result;
    }

    fsync_dir(&parent)
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }
    std::fs::rename(tmp, path)
}
