//! Build progress tracking and reporting, for the purpose of display to the
//! user.
//!
//! The core never prints; it reports events through this trait and the
//! driver decides what, if anything, to render.

use crate::graph::{Node, NodeId, Status};
use crate::process::Command;
use std::cell::Cell;
use std::process::ExitStatus;

/// Compute the message to display on the console for a given node.
pub fn node_message(node: &Node) -> String {
    match &node.desc {
        Some(desc) if !desc.is_empty() => desc.clone(),
        _ if node.outputs().is_empty() => "(no outputs)".to_string(),
        _ => node.outputs().join(" "),
    }
}

/// Trait for build progress notifications.
pub trait Progress {
    /// Called when a node is found to be stale, with the reason.  Only
    /// emitted when explanations were requested.
    fn node_dirty(&self, id: NodeId, node: &Node, why: &str);

    /// Called when a task starts working on a node.
    fn task_started(&self, id: NodeId, node: &Node);

    /// Called when a command's process is spawned, which may be well after
    /// the update body asked for it if the pool was full.
    fn command_started(&self, id: NodeId, cmd: &Command);

    /// Called when a started command exits.
    fn command_finished(&self, id: NodeId, cmd: &Command, status: ExitStatus);

    /// Called when a task completes, with the node's resulting status and
    /// the error captured from its body, if any.
    fn task_finished(&self, id: NodeId, node: &Node, status: Status, err: Option<&anyhow::Error>);

    /// Log a line of output.
    fn log(&self, msg: &str);
}

/// Progress implementation that ignores everything.
#[derive(Default)]
pub struct NoProgress {}

impl Progress for NoProgress {
    fn node_dirty(&self, _id: NodeId, _node: &Node, _why: &str) {}
    fn task_started(&self, _id: NodeId, _node: &Node) {}
    fn command_started(&self, _id: NodeId, _cmd: &Command) {}
    fn command_finished(&self, _id: NodeId, _cmd: &Command, _status: ExitStatus) {}
    fn task_finished(
        &self,
        _id: NodeId,
        _node: &Node,
        _status: Status,
        _err: Option<&anyhow::Error>,
    ) {
    }
    fn log(&self, _msg: &str) {}
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last node announced, used to avoid announcing it twice
    /// when it runs several commands in a row.
    last_started: Cell<Option<NodeId>>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: Default::default(),
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn node_dirty(&self, _id: NodeId, node: &Node, why: &str) {
        self.log(&format!("explain: {}: {}", node_message(node), why));
    }

    fn task_started(&self, _id: NodeId, _node: &Node) {
        // Announced once it actually runs a command.
    }

    fn command_started(&self, id: NodeId, cmd: &Command) {
        if self.verbose {
            self.log(&cmd.display());
        } else if self.last_started.get() != Some(id) {
            self.log(&cmd.argv.last().cloned().unwrap_or_default());
        }
        self.last_started.set(Some(id));
    }

    fn command_finished(&self, _id: NodeId, _cmd: &Command, _status: ExitStatus) {
        // ignore; failures are reported per node.
    }

    fn task_finished(&self, _id: NodeId, node: &Node, status: Status, err: Option<&anyhow::Error>) {
        if status != Status::Failed {
            return;
        }
        match err {
            Some(err) => self.log(&format!("failed: {}: {}", node_message(node), err)),
            None => self.log(&format!("failed: {}", node_message(node))),
        }
    }

    fn log(&self, msg: &str) {
        println!("{}", msg);
    }
}
