//! Crash-safe file primitives.
//!
//! Content is always written to a uniquely named sibling file first, flushed, and then
//! moved into place with a single rename (replace) or hard link (create-if-absent).
//! A reader polling the target path sees either the previous content or the new
//! content, never a prefix of it.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Sibling temp files start with `.` so directory scans skip them.
const TEMP_PREFIX: char = '.';
const TEMP_SUFFIX: &str = ".tmp";

/// Replace the content of `path` atomically, creating parent directories as needed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = stage(path, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| discard(&tmp))
}

/// Create `path` with `bytes` only if it does not exist yet.
///
/// Returns `Ok(false)` when the target already exists; its content is left untouched.
pub fn atomic_create(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    let tmp = stage(path, bytes)?;
    let linked = fs::hard_link(&tmp, path);
    discard(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove `path`, treating an already missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read `path`, mapping a missing file to `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

fn stage(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let tmp = temp_sibling(dir, path);
    let written = File::create_new(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        discard(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

fn temp_sibling(dir: &Path, path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(
        "{TEMP_PREFIX}{name}.{}{TEMP_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ))
}

fn discard(tmp: &Path) {
    let _ = fs::remove_file(tmp);
}
