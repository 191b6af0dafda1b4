//! Failure values that cross the boundary between the core and its driver.
//!
//! Build-level failures (a command exited non-zero, a dependency failed) are
//! recoverable: they fail the node and its dependents but the traversal goes
//! on.  Everything else is fatal and aborts the pass.

use std::process::ExitStatus;

/// A spawned process exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {} ({status})", .argv.join(" "))]
pub struct CommandFailed {
    pub argv: Vec<String>,
    pub status: ExitStatus,
}

/// A build-level failure other than a failing command, e.g. a process that
/// could not be spawned.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Recoverable(pub String);

/// Structural problems with the graph itself.  Never recoverable.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("output {path:?} is produced by two different nodes")]
    DuplicateOutput { path: String },
    #[error("unknown rule {0:?}")]
    UnknownRule(String),
    #[error("{0} node(s) still waiting after the pass finished (dependency cycle?)")]
    Stalled(usize),
}

/// Whether an error raised by an update body should fail just its node
/// rather than the whole traversal.
pub fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CommandFailed>().is_some() || err.downcast_ref::<Recoverable>().is_some()
}
