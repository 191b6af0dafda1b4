//! Timestamp snapshots of a node's paths, and the freshness predicate built
//! on them.
//!
//! Staleness is decided purely by modification time order: a node is fresh
//! when every output postdates every input.

use crate::fs::{FileSystem, MTime};
use std::time::SystemTime;

/// What moved between two snapshots of a PathState.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Changes {
    /// Paths that exist now but did not at the previous snapshot.
    pub added: Vec<String>,
    /// Paths that existed at the previous snapshot but do not now.
    pub removed: Vec<String>,
    /// Paths whose modification time differs.
    pub changed: Vec<String>,
}

impl Changes {
    pub fn any(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty())
    }
}

/// Modification times for a fixed set of paths.
#[derive(Debug, Clone)]
pub struct PathState {
    paths: Vec<String>,
    /// Parallel to `paths`; None until the first snapshot.
    mtimes: Option<Vec<MTime>>,
}

impl PathState {
    pub fn new(paths: Vec<String>) -> Self {
        PathState {
            paths,
            mtimes: None,
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Whether a snapshot has been taken.
    pub fn resolved(&self) -> bool {
        self.mtimes.is_some()
    }

    pub fn mtime(&self, path: &str) -> Option<MTime> {
        let i = self.paths.iter().position(|p| p == path)?;
        self.mtimes.as_ref().map(|m| m[i])
    }

    /// Re-stat every path, classifying differences against the previous
    /// snapshot.  The first snapshot reports every existing path as added.
    pub fn snapshot(&mut self, fs: &dyn FileSystem) -> std::io::Result<Changes> {
        let mut next = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            next.push(fs.stat(path)?);
        }

        let mut changes = Changes::default();
        for (i, path) in self.paths.iter().enumerate() {
            let prev = match &self.mtimes {
                Some(prev) => prev[i],
                None => MTime::Missing,
            };
            match (prev, next[i]) {
                (MTime::Missing, MTime::Missing) => {}
                (MTime::Missing, MTime::Stamp(_)) => changes.added.push(path.clone()),
                (MTime::Stamp(_), MTime::Missing) => changes.removed.push(path.clone()),
                (MTime::Stamp(a), MTime::Stamp(b)) => {
                    if a != b {
                        changes.changed.push(path.clone());
                    }
                }
            }
        }
        self.mtimes = Some(next);
        Ok(changes)
    }

    fn stamps(&self) -> impl Iterator<Item = SystemTime> + '_ {
        self.mtimes
            .iter()
            .flatten()
            .filter_map(|mtime| mtime.stamp())
    }

    /// Earliest recorded modification time, if any path has one.
    pub fn oldest(&self) -> Option<SystemTime> {
        self.stamps().min()
    }

    /// Latest recorded modification time, if any path has one.
    pub fn newest(&self) -> Option<SystemTime> {
        self.stamps().max()
    }

    /// Whether any tracked path did not exist at the last snapshot.
    /// An unsnapshotted state counts as missing everything it tracks.
    pub fn missing(&self) -> bool {
        match &self.mtimes {
            None => !self.paths.is_empty(),
            Some(mtimes) => mtimes.iter().any(|m| *m == MTime::Missing),
        }
    }

    pub fn intersects<S: AsRef<str>>(&self, other: &[S]) -> bool {
        other
            .iter()
            .any(|p| self.paths.iter().any(|mine| mine == p.as_ref()))
    }
}

/// The input and output snapshots of one node.
#[derive(Debug, Clone)]
pub struct IoState {
    pub inputs: PathState,
    pub outputs: PathState,
}

impl IoState {
    pub fn new(inputs: Vec<String>, outputs: Vec<String>) -> Self {
        IoState {
            inputs: PathState::new(inputs),
            outputs: PathState::new(outputs),
        }
    }

    /// Every output exists and is strictly newer than every input.
    /// Equal timestamps count as stale, so coarse mtime resolution errs
    /// toward rebuilding.
    pub fn fresh(&self) -> bool {
        if !self.inputs.resolved() || !self.outputs.resolved() || self.outputs.missing() {
            return false;
        }
        match (self.outputs.oldest(), self.inputs.newest()) {
            (Some(oldest_out), Some(newest_in)) => oldest_out > newest_in,
            _ => false,
        }
    }

    /// Re-snapshot both sides; true if either changed.
    pub fn update(&mut self, fs: &dyn FileSystem) -> std::io::Result<bool> {
        let ins = self.inputs.snapshot(fs)?;
        let outs = self.outputs.snapshot(fs)?;
        Ok(ins.any() || outs.any())
    }

    pub fn intersects<S: AsRef<str>>(&self, paths: &[S]) -> bool {
        self.inputs.intersects(paths) || self.outputs.intersects(paths)
    }

    pub fn resolved(&self) -> bool {
        self.inputs.resolved() && self.outputs.resolved()
    }

    /// Human-readable reason this state is not fresh, for explain output.
    pub fn why_stale(&self) -> String {
        if let Some(path) = self.missing_output() {
            return format!("output {} is missing", path);
        }
        match (self.outputs.oldest(), self.inputs.newest()) {
            (Some(_), Some(_)) => "an input is not older than the oldest output".to_string(),
            (_, None) => "no input timestamps to compare against".to_string(),
            (None, _) => "no output timestamps to compare against".to_string(),
        }
    }

    fn missing_output(&self) -> Option<&str> {
        self.outputs
            .paths()
            .iter()
            .find(|p| !matches!(self.outputs.mtime(p), Some(MTime::Stamp(_))))
            .map(|p| p.as_str())
    }
}
