//! Incremental build-graph execution: decide which steps are stale from
//! file timestamps, run only those, in dependency order, overlapping
//! independent commands as external processes.

pub mod canon;
mod densemap;
pub mod error;
pub mod fs;
mod gate;
pub mod graph;
pub mod options;
pub mod pool;
pub mod process;
#[cfg(unix)]
mod process_posix;
pub mod progress;
pub mod rules;
pub mod state;
mod task;
pub mod trace;
mod walk;

pub use error::{is_recoverable, CommandFailed, GraphError, Recoverable};
pub use graph::{Graph, Node, NodeId, NodeKey, Status, Summary};
pub use options::Options;
pub use process::Command;
pub use task::Context;
