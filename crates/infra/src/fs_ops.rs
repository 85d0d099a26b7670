//! File-system primitives used by the retrieval agents.
//!
//! Every placement is no-clobber: an existing destination is reported as
//! [`Placed::AlreadyExists`] and left untouched, which is what makes re-running an
//! action after a lost write-back harmless.

use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

/// File-system failure while retrieving job files.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{0} does not exist")]
    Missing(PathBuf),

    #[error("{0} is not a regular file")]
    NotRegularFile(PathBuf),

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of placing a file at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placed {
    Created,
    AlreadyExists,
}

/// Succeeds only for an existing regular file that is not a symlink.
pub fn check_regular_file(path: &Path) -> Result<(), FsError> {
    classify(path, fs::symlink_metadata(path))
}

/// Like [`check_regular_file`], but a symlink is judged by what it points to.
pub fn check_regular_target(path: &Path) -> Result<(), FsError> {
    classify(path, fs::metadata(path))
}

fn classify(path: &Path, meta: io::Result<fs::Metadata>) -> Result<(), FsError> {
    match meta {
        Ok(meta) if meta.file_type().is_file() => Ok(()),
        Ok(_) => Err(FsError::NotRegularFile(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::Missing(path.to_path_buf())),
        Err(e) => Err(FsError::io("stat", path, e)),
    }
}

/// Whether anything (file, directory, dangling symlink) exists at `path`.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Copy `src` to `dest` unless `dest` exists, keeping permissions and
/// modification time.
///
/// The data is staged in a temporary file next to `dest` and linked into place
/// only once complete, so `dest` never holds a partial copy.
pub fn copy_no_clobber(src: &Path, dest: &Path) -> Result<Placed, FsError> {
    staged_copy(src, dest, None)
}

/// [`copy_no_clobber`] with `mode` as the destination's permission bits.
pub fn copy_no_clobber_with_mode(src: &Path, dest: &Path, mode: u32) -> Result<Placed, FsError> {
    staged_copy(src, dest, Some(mode))
}

fn staged_copy(src: &Path, dest: &Path, mode: Option<u32>) -> Result<Placed, FsError> {
    if exists(dest) {
        return Ok(Placed::AlreadyExists);
    }
    let mut input = File::open(src).map_err(|e| FsError::io("open", src, e))?;
    let meta = input.metadata().map_err(|e| FsError::io("stat", src, e))?;

    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // Dropping `staged` on any early return removes the temporary file.
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| FsError::io("stage in", dir, e))?;
    io::copy(&mut input, staged.as_file_mut()).map_err(|e| FsError::io("copy to", dest, e))?;

    let file = staged.as_file();
    let permissions = mode.map_or_else(|| meta.permissions(), Permissions::from_mode);
    file.set_permissions(permissions)
        .map_err(|e| FsError::io("chmod", dest, e))?;
    if let Ok(mtime) = meta.modified() {
        file.set_modified(mtime)
            .map_err(|e| FsError::io("set mtime of", dest, e))?;
    }
    file.sync_all().map_err(|e| FsError::io("sync", dest, e))?;

    match staged.persist_noclobber(dest) {
        Ok(_) => Ok(Placed::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(Placed::AlreadyExists),
        Err(e) => Err(FsError::io("place", dest, e.error)),
    }
}

/// Create a symlink at `dest` pointing to `src` unless `dest` exists.
pub fn symlink_no_clobber(src: &Path, dest: &Path) -> Result<Placed, FsError> {
    match symlink(src, dest) {
        Ok(()) => Ok(Placed::Created),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(Placed::AlreadyExists),
        Err(e) => Err(FsError::io("symlink", dest, e)),
    }
}
