//! File system access, indirected so staleness can be computed against an
//! in-memory tree in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn stamp(&self) -> Option<SystemTime> {
        match *self {
            MTime::Missing => None,
            MTime::Stamp(t) => Some(t),
        }
    }
}

/// Shared between the orchestrating thread and the rayon pool used for bulk
/// stats, hence Send + Sync.
pub trait FileSystem: Send + Sync {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(meta.modified()?)),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    Ok(MTime::Missing)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Implementation of FileSystem that is memory-backed, for tests and for
/// driving staleness decisions from recorded timestamps.
#[derive(Default)]
pub struct MemFileSystem {
    files: Mutex<HashMap<String, SystemTime>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or touch `path`, with an mtime `secs` after the epoch.
    pub fn set(&self, path: &str, secs: u64) {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        self.lock().insert(path.to_string(), t);
    }

    pub fn remove(&self, path: &str) {
        self.lock().remove(path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SystemTime>> {
        // A panicking test thread can't leave the map half-updated.
        self.files.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl FileSystem for MemFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match self.lock().get(path) {
            Some(&t) => MTime::Stamp(t),
            None => MTime::Missing,
        })
    }
}
