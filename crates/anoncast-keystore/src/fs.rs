//! Owner-only file helpers for key material.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{KeyStoreError, Result};

/// Permission mode for key store directories.
pub(crate) const DIR_MODE: u32 = 0o700;
/// Permission mode for key and cursor files.
pub(crate) const FILE_MODE: u32 = 0o600;

const GENERATE_CHUNK: usize = 64 * 1024;

/// Advisory lock file at the root of a file-backed store.
pub(crate) const LOCK_FILE: &str = ".lock";

/// Create `path` and any missing parents with owner-only permissions.
pub(crate) fn create_private_dir_all(path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder
        .create(path)
        .map_err(|e| KeyStoreError::storage(path, e))
}

/// Create exactly `path` (not its parents). Fails if it already exists.
pub(crate) fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    options
}

/// Write a new owner-only file. Refuses to overwrite.
pub(crate) fn write_private_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = private_options()
        .open(path)
        .map_err(|e| KeyStoreError::storage(path, e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| KeyStoreError::storage(path, e))
}

/// Fill a new owner-only file with `len` bytes from the OS RNG.
pub(crate) fn write_random_file(path: &Path, len: u64) -> Result<()> {
    let mut file = private_options()
        .open(path)
        .map_err(|e| KeyStoreError::storage(path, e))?;
    let mut chunk = vec![0u8; GENERATE_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(GENERATE_CHUNK as u64) as usize;
        OsRng.fill_bytes(&mut chunk[..n]);
        file.write_all(&chunk[..n])
            .map_err(|e| KeyStoreError::storage(path, e))?;
        remaining -= n as u64;
    }
    file.sync_all().map_err(|e| KeyStoreError::storage(path, e))
}

/// Copy `src` into a new owner-only file at `dst`.
pub(crate) fn copy_private_file(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src).map_err(|e| KeyStoreError::storage(src, e))?;
    let mut output = private_options()
        .open(dst)
        .map_err(|e| KeyStoreError::storage(dst, e))?;
    std::io::copy(&mut input, &mut output).map_err(|e| KeyStoreError::storage(dst, e))?;
    output.sync_all().map_err(|e| KeyStoreError::storage(dst, e))
}

/// Read a persisted cursor. A missing file means the cursor never moved.
pub(crate) fn read_cursor(path: &Path) -> Result<u64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(KeyStoreError::storage(path, err)),
    };
    let mut raw = [0u8; 8];
    file.read_exact(&mut raw)
        .map_err(|e| KeyStoreError::storage(path, e))?;
    Ok(u64::from_le_bytes(raw))
}

/// Durably replace the cursor file with `value`.
///
/// Written to a sibling temp file, renamed over the old one, then the
/// directory is synced so the new cursor survives a crash once this returns.
pub(crate) fn write_cursor(path: &Path, value: u64) -> Result<()> {
    let tmp = tmp_sibling(path);
    let _ = std::fs::remove_file(&tmp);
    write_private_file(&tmp, &value.to_le_bytes())?;
    std::fs::rename(&tmp, path).map_err(|e| KeyStoreError::storage(path, e))?;
    sync_parent_dir(path)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    File::open(dir)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| KeyStoreError::storage(dir, e))
}

// Directory handles cannot be synced on Windows; the rename is already durable there.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Take the exclusive lock on a store root.
///
/// The lock lives as long as the returned file. A second holder, in this
/// process or another, gets [`KeyStoreError::Locked`].
pub(crate) fn lock_root(root: &Path) -> Result<File> {
    let path = root.join(LOCK_FILE);
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    let file = options
        .open(&path)
        .map_err(|e| KeyStoreError::storage(&path, e))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(KeyStoreError::Locked {
                path: root.to_path_buf(),
            })
        }
        Err(err) => Err(KeyStoreError::storage(&path, err)),
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
