//! Per-traversal bookkeeping: which nodes are still dirty, who is waiting on
//! which path or node, and which paths belong to failed nodes.
//!
//! A Walker lives for one pass.  All of its state is touched only from the
//! single thread driving the pass, between suspension points, so plain
//! RefCells suffice.

use crate::fs::FileSystem;
use crate::gate::JoinGate;
use crate::graph::{NodeId, Registry, Status, Summary};
use crate::pool::ProcessPool;
use crate::progress::Progress;
use crate::task::Task;
use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Whether a pass executes commands.  Discovery runs update bodies only to
/// learn the graph's shape; execution always carries the pool to run in.
pub(crate) enum Mode {
    Discover,
    Execute(Rc<ProcessPool>),
}

#[derive(Default)]
struct WalkState {
    /// Nodes known dirty in this pass that have not exited: those dirty at
    /// the start plus those resolved dirty along the way.
    dirty: FxHashSet<NodeId>,
    /// Output path => gates waiting for its producer to exit.  A key is
    /// present exactly while the path has a producer that may still run.
    path_gates: FxHashMap<String, Vec<Rc<JoinGate>>>,
    /// Node => gates waiting for it to exit.
    node_gates: FxHashMap<NodeId, Vec<Rc<JoinGate>>>,
    failed_paths: FxHashSet<String>,
    failed_nodes: FxHashSet<NodeId>,
    /// Nodes with a task running.
    in_flight: FxHashSet<NodeId>,
    /// Nodes whose task already finished in this pass.
    exited: FxHashSet<NodeId>,
    visited: usize,
    ran: usize,
    /// First fatal error raised by any task; aborts the pass.
    fatal: Option<anyhow::Error>,
}

pub(crate) struct Walker {
    pub registry: Rc<RefCell<Registry>>,
    pub fs: Arc<dyn FileSystem>,
    pub progress: Rc<dyn Progress>,
    pub mode: Mode,
    explain: bool,
    spawner: LocalSpawner,
    state: RefCell<WalkState>,
}

impl Walker {
    pub fn new(
        registry: Rc<RefCell<Registry>>,
        fs: Arc<dyn FileSystem>,
        progress: Rc<dyn Progress>,
        mode: Mode,
        explain: bool,
        spawner: LocalSpawner,
    ) -> Self {
        // Seed from the nodes already known dirty, so dependents wait for
        // them even before they start.
        let mut state = WalkState::default();
        for (id, node) in registry.borrow().nodes.iter() {
            if node.status() != Status::Dirty {
                continue;
            }
            state.dirty.insert(id);
            for out in node.outputs() {
                state.path_gates.entry(out.clone()).or_default();
            }
            state.node_gates.entry(id).or_default();
        }

        Walker {
            registry,
            fs,
            progress,
            mode,
            explain,
            spawner,
            state: RefCell::new(state),
        }
    }

    pub fn executes(&self) -> bool {
        matches!(self.mode, Mode::Execute(_))
    }

    /// Kick off the pass from its top-level nodes.
    pub fn start(self: &Rc<Self>, roots: &[NodeId]) -> anyhow::Result<()> {
        for &root in roots {
            self.update_if_needed(root)?;
        }
        Ok(())
    }

    /// Start a task for `id` unless it is clean, already running, or already
    /// finished in this pass.  The task is queued on the executor, not run
    /// inline.
    pub fn update_if_needed(self: &Rc<Self>, id: NodeId) -> anyhow::Result<()> {
        {
            let state = self.state.borrow();
            if state.in_flight.contains(&id) || state.exited.contains(&id) {
                return Ok(());
            }
        }

        let (inputs, outputs, body) = {
            let mut reg = self.registry.borrow_mut();
            if self.executes() && reg.nodes[id].status() == Status::Unknown {
                // Not seen by a discovery pass (e.g. declared just now by a
                // running parent); settle it before deciding.
                let node = &mut reg.nodes[id];
                node.io.update(&*self.fs)?;
                if node.resolve_initial_status() == Status::Dirty {
                    self.state.borrow_mut().dirty.insert(id);
                    if self.explain {
                        self.progress.node_dirty(id, node, &node.io.why_stale());
                    }
                }
            }
            let node = &reg.nodes[id];
            if node.status() == Status::Clean {
                return Ok(());
            }
            self.progress.task_started(id, node);
            (node.inputs().to_vec(), node.outputs().to_vec(), reg.body(id))
        };

        {
            let mut state = self.state.borrow_mut();
            state.in_flight.insert(id);
            for out in &outputs {
                state.path_gates.entry(out.clone()).or_default();
            }
            state.node_gates.entry(id).or_default();
        }

        let task = Rc::new(Task::new(self.clone(), id, inputs, outputs));
        self.spawner.spawn_local(task.visit(body))?;
        Ok(())
    }

    /// Suspend until every in-progress producer of `paths` has exited.
    /// Producers nobody has started yet are started.  Returns whether any
    /// producer failed, including ones that failed before this call.
    pub async fn wait_on_paths(self: &Rc<Self>, paths: &[String]) -> anyhow::Result<bool> {
        let (gate, wait) = JoinGate::new(0);
        let gate = Rc::new(gate);
        for path in paths {
            let producer = self.registry.borrow().producer(path);
            if let Some(producer) = producer {
                self.update_if_needed(producer)?;
            }

            let mut state = self.state.borrow_mut();
            if state.failed_paths.contains(path) {
                gate.fail();
            }
            if let Some(gates) = state.path_gates.get_mut(path) {
                gate.arm();
                gates.push(gate.clone());
            }
        }
        Ok(gate.wait(wait).await)
    }

    /// Suspend until every node in `nodes` that is still running has
    /// exited.  Returns whether any of them failed in this pass.
    pub async fn wait_for_nodes(&self, nodes: &[NodeId]) -> bool {
        let (gate, wait) = JoinGate::new(0);
        let gate = Rc::new(gate);
        {
            let mut state = self.state.borrow_mut();
            for id in nodes {
                if state.failed_nodes.contains(id) {
                    gate.fail();
                }
                if let Some(gates) = state.node_gates.get_mut(id) {
                    gate.arm();
                    gates.push(gate.clone());
                }
            }
        }
        gate.wait(wait).await
    }

    /// A node's task finished: record the outcome and release everyone
    /// waiting on its outputs, then everyone waiting on the node itself.
    pub fn exit(&self, id: NodeId, outputs: &[String], failed: bool) {
        let mut released = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            state.dirty.remove(&id);
            state.in_flight.remove(&id);
            state.exited.insert(id);
            state.visited += 1;
            if failed {
                state.failed_nodes.insert(id);
                state.failed_paths.extend(outputs.iter().cloned());
            }
            for out in outputs {
                released.extend(state.path_gates.remove(out).unwrap_or_default());
            }
            released.extend(state.node_gates.remove(&id).unwrap_or_default());
        }
        // Reporting only fires one-shot channels; the woken tasks run later,
        // so no state borrow is needed here.
        for gate in released {
            gate.report(failed);
        }
    }

    pub fn count_command(&self) {
        self.state.borrow_mut().ran += 1;
    }

    /// Record a fatal error; the pass stops at the next check().
    pub fn abort(&self, err: anyhow::Error) {
        let mut state = self.state.borrow_mut();
        if state.fatal.is_none() {
            state.fatal = Some(err);
        }
    }

    pub fn check(&self) -> anyhow::Result<()> {
        match self.state.borrow_mut().fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Called once the executor has nothing left to run.  Any task still in
    /// flight is waiting on something that will never come.
    pub fn finish(&self) -> anyhow::Result<()> {
        self.check()?;
        let pending = self.state.borrow().in_flight.len();
        if pending > 0 {
            return Err(crate::error::GraphError::Stalled(pending).into());
        }
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        let state = self.state.borrow();
        Summary {
            visited: state.visited,
            ran: state.ran,
            failed: state.failed_nodes.len(),
            left_dirty: state.dirty.len(),
        }
    }
}
