//! Filesystem abstraction.
//!
//! The engine never touches `std::fs` directly for build state; everything
//! goes through the `FileSystem` trait so tests can run against an in-memory
//! implementation with a controllable clock.

use std::os::unix::prelude::MetadataExt;
use std::time::{SystemTime, UNIX_EPOCH};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MTime {
    Missing,
    Stamp(i64),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }
}

pub trait FileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;

    /// stat() a path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;

    /// Write a file, used by function actions to produce their targets.
    fn write(&self, path: &str, data: &[u8]) -> std::io::Result<()>;

    /// Create a directory and its parents, used to prepare target locations.
    fn mkdirs(&self, dir: &str) -> std::io::Result<()>;

    /// Whether a path names a directory.
    fn is_dir(&self, _path: &str) -> bool {
        false
    }

    /// Current wall-clock time in whole seconds, comparable to MTime stamps.
    fn now(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        }
    }
}

/// The real, disk-backed filesystem.
pub struct SystemFs {}

impl SystemFs {
    pub fn new() -> Self {
        SystemFs {}
    }
}

impl Default for SystemFs {
    fn default() -> Self {
        SystemFs::new()
    }
}

impl FileSystem for SystemFs {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) => MTime::Stamp(meta.mtime()),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, data)
    }

    fn mkdirs(&self, dir: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)
    }

    fn is_dir(&self, path: &str) -> bool {
        std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }
}
