//! Filesystem probing capability.
//!
//! Device discovery only touches the filesystem through [`IoHandler`], so the
//! locator, rescan and detach logic can run against an in-memory tree in
//! tests and against the real `/dev` and `/sys` in production.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What `lstat` found at a path. Symlinks are not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

pub trait IoHandler: Send + Sync {
    /// Names of the entries of `dir`, sorted.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>>;

    fn lstat(&self, path: &Path) -> io::Result<FileKind>;

    /// Resolve every symlink in `path` to the final real path.
    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf>;

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// [`IoHandler`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsIoHandler;

impl IoHandler for OsIoHandler {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileKind> {
        let file_type = fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else {
            FileKind::File
        })
    }

    fn eval_symlinks(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}
