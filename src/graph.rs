//! The build graph: nodes keyed by their input/output path sets, and the
//! discovery and update passes over them.

use crate::canon::canon_paths;
use crate::densemap::{self, DenseMap};
use crate::error::GraphError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::options::Options;
use crate::pool::ProcessPool;
use crate::progress::{NoProgress, Progress};
use crate::rules::Rulebook;
use crate::state::IoState;
use crate::task::Context;
use crate::trace;
use crate::walk::{Mode, Walker};
use futures::executor::LocalPool;
use futures::future::{FutureExt, LocalBoxFuture};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cell::{Ref, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    /// Not yet checked against the file system.
    Unknown,
    /// Outputs are stale and the node needs to run.
    Dirty,
    /// Every output exists and is newer than every input.
    Clean,
    /// Ran (or had a dependency that ran) and failed.
    Failed,
}

/// Node identity: canonicalized, sorted, deduplicated input and output
/// path lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl NodeKey {
    pub fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        NodeKey {
            inputs: canon_paths(inputs),
            outputs: canon_paths(outputs),
        }
    }
}

/// The procedure that brings a node up to date.  It runs once per traversal
/// that visits the node, and may declare children and run commands through
/// its Context.
pub type UpdateFn = Rc<dyn Fn(Context) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// Box an async closure into an UpdateFn.
pub fn update_fn<F, Fut>(f: F) -> UpdateFn
where
    F: Fn(Context) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    Rc::new(move |ctx| f(ctx).boxed_local())
}

/// One build step.
#[derive(Debug)]
pub struct Node {
    key: NodeKey,
    /// Message shown to the user instead of the output list.
    pub desc: Option<String>,
    status: Status,
    pub(crate) io: IoState,
}

impl Node {
    fn new(key: NodeKey) -> Self {
        let io = IoState::new(key.inputs.clone(), key.outputs.clone());
        Node {
            key,
            desc: None,
            status: Status::Unknown,
            io,
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn inputs(&self) -> &[String] {
        &self.key.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.key.outputs
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn io(&self) -> &IoState {
        &self.io
    }

    /// Settle an unknown status from the current snapshot.  Has no effect
    /// once the status is known.
    pub fn resolve_initial_status(&mut self) -> Status {
        if self.status == Status::Unknown {
            self.status = if self.io.fresh() {
                Status::Clean
            } else {
                Status::Dirty
            };
        }
        self.status
    }

    /// Re-check this node after `changed` paths moved.  Returns true if the
    /// node just became dirty.
    pub fn mark_changed<S: AsRef<str>>(
        &mut self,
        fs: &dyn FileSystem,
        changed: &[S],
    ) -> std::io::Result<bool> {
        if self.status == Status::Dirty {
            return Ok(false);
        }
        let touched = self.io.intersects(changed);
        // The first snapshot of a never-checked node sees every path as
        // "added", which says nothing about staleness.
        let was_resolved = self.io.resolved();
        let moved = self.io.update(fs)? && was_resolved;
        if touched || moved {
            self.status = Status::Dirty;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn mark_clean(&mut self) {
        debug_assert!(self.status != Status::Failed);
        self.status = Status::Clean;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = Status::Failed;
    }
}

/// The node arena, shared with the tasks of a running pass.
#[derive(Default)]
pub(crate) struct Registry {
    pub nodes: DenseMap<NodeId, Node>,
    bodies: DenseMap<NodeId, Option<UpdateFn>>,
    by_key: FxHashMap<NodeKey, NodeId>,
    /// Output path => the node that writes it.
    producers: FxHashMap<String, NodeId>,
}

impl Registry {
    /// Register a node, or return the existing one with the same key.  A
    /// repeated registration keeps the body it was first given.
    pub fn add(
        &mut self,
        inputs: &[&str],
        outputs: &[&str],
        body: Option<UpdateFn>,
    ) -> Result<NodeId, GraphError> {
        let key = NodeKey::new(inputs, outputs);
        if let Some(&id) = self.by_key.get(&key) {
            return Ok(id);
        }
        if let Some(path) = key
            .outputs
            .iter()
            .find(|out| self.producers.contains_key(*out))
        {
            return Err(GraphError::DuplicateOutput { path: path.clone() });
        }

        let id = self.nodes.push(Node::new(key.clone()));
        self.bodies.push(body);
        for out in &key.outputs {
            self.producers.insert(out.clone(), id);
        }
        self.by_key.insert(key, id);
        Ok(id)
    }

    pub fn producer(&self, path: &str) -> Option<NodeId> {
        self.producers.get(path).copied()
    }

    pub fn body(&self, id: NodeId) -> Option<UpdateFn> {
        self.bodies[id].clone()
    }
}

/// Counts from one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Nodes whose task ran to completion.
    pub visited: usize,
    /// Commands that were executed.
    pub ran: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes found dirty that the pass never reached, e.g. ones outside
    /// the requested roots.
    pub left_dirty: usize,
}

pub struct Graph {
    registry: Rc<RefCell<Registry>>,
    fs: Arc<dyn FileSystem>,
    progress: Rc<dyn Progress>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        Graph::with_fs(Arc::new(RealFileSystem::new()))
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Graph {
        Graph {
            registry: Default::default(),
            fs,
            progress: Rc::new(NoProgress::default()),
        }
    }

    pub fn set_progress(&mut self, progress: Rc<dyn Progress>) {
        self.progress = progress;
    }

    /// Register a node with an update body, deduplicated on its path sets.
    pub fn add_node<F, Fut>(
        &mut self,
        inputs: &[&str],
        outputs: &[&str],
        body: F,
    ) -> anyhow::Result<NodeId>
    where
        F: Fn(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Ok(self
            .registry
            .borrow_mut()
            .add(inputs, outputs, Some(update_fn(body)))?)
    }

    /// Register a node with nothing to run, e.g. one that only groups
    /// children or declares paths.
    pub fn add_leaf(&mut self, inputs: &[&str], outputs: &[&str]) -> anyhow::Result<NodeId> {
        Ok(self.registry.borrow_mut().add(inputs, outputs, None)?)
    }

    /// Register a node whose body is the rule `name` from `rules`.
    pub fn add_rule_node(
        &mut self,
        rules: &Rulebook,
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
    ) -> anyhow::Result<NodeId> {
        let body = rules.get(name)?;
        let id = self.registry.borrow_mut().add(inputs, outputs, Some(body))?;
        Ok(id)
    }

    pub fn describe(&mut self, id: NodeId, desc: impl Into<String>) {
        self.registry.borrow_mut().nodes[id].desc = Some(desc.into());
    }

    pub fn lookup(&self, inputs: &[&str], outputs: &[&str]) -> Option<NodeId> {
        let key = NodeKey::new(inputs, outputs);
        self.registry.borrow().by_key.get(&key).copied()
    }

    /// The node that writes `path`, if any.
    pub fn producer(&self, path: &str) -> Option<NodeId> {
        self.registry
            .borrow()
            .producer(&crate::canon::canon_path(path))
    }

    pub fn node(&self, id: NodeId) -> Ref<'_, Node> {
        Ref::map(self.registry.borrow(), |r| &r.nodes[id])
    }

    pub fn status(&self, id: NodeId) -> Status {
        self.registry.borrow().nodes[id].status()
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any node is currently marked failed.
    pub fn any_failed(&self) -> bool {
        self.registry
            .borrow()
            .nodes
            .iter()
            .any(|(_, node)| node.status() == Status::Failed)
    }

    /// Invalidate after `paths` changed on disk, e.g. from a file watcher.
    /// Newly dirty nodes cascade to every node overlapping their outputs.
    /// Returns the nodes that became dirty.
    pub fn mark_changed(&mut self, paths: &[&str]) -> anyhow::Result<Vec<NodeId>> {
        let changed = canon_paths(paths);
        let fs = &*self.fs;
        let mut reg = self.registry.borrow_mut();

        let mut newly_dirty = Vec::new();
        for id in reg.nodes.all_ids() {
            if reg.nodes[id].mark_changed(fs, &changed)? {
                newly_dirty.push(id);
            }
        }

        let mut queue = newly_dirty.clone();
        while let Some(id) = queue.pop() {
            let outs = reg.nodes[id].outputs().to_vec();
            if outs.is_empty() {
                continue;
            }
            for other in reg.nodes.all_ids() {
                if other == id || !reg.nodes[other].io.intersects(&outs) {
                    continue;
                }
                if reg.nodes[other].mark_changed(fs, &outs)? {
                    newly_dirty.push(other);
                    queue.push(other);
                }
            }
        }
        Ok(newly_dirty)
    }

    fn walker(&self, mode: Mode, options: &Options, exec: &LocalPool) -> Rc<Walker> {
        Rc::new(Walker::new(
            self.registry.clone(),
            self.fs.clone(),
            self.progress.clone(),
            mode,
            options.explain,
            exec.spawner(),
        ))
    }

    /// Walk `roots` running update bodies without executing any command,
    /// declaring the graph's shape, then settle every unknown status.
    pub fn discover(&mut self, roots: &[NodeId], options: &Options) -> anyhow::Result<Summary> {
        trace::scope("discover", || {
            let mut exec = LocalPool::new();
            let walker = self.walker(Mode::Discover, options, &exec);
            walker.start(roots)?;
            exec.run_until_stalled();
            walker.finish()?;
            let summary = walker.summary();
            drop(walker);

            self.resolve_all(options)?;
            Ok(summary)
        })
    }

    /// Snapshot every unresolved node in parallel, then resolve statuses.
    fn resolve_all(&self, options: &Options) -> anyhow::Result<()> {
        let fs = &*self.fs;
        let mut reg = self.registry.borrow_mut();
        trace::scope("stat", || {
            reg.nodes
                .values_mut()
                .par_iter_mut()
                .filter(|node| node.status == Status::Unknown && !node.io.resolved())
                .try_for_each(|node| node.io.update(fs).map(|_| ()))
        })?;

        for id in reg.nodes.all_ids() {
            let node = &mut reg.nodes[id];
            if node.status != Status::Unknown {
                continue;
            }
            if node.resolve_initial_status() == Status::Dirty && options.explain {
                self.progress.node_dirty(id, node, &node.io.why_stale());
            }
        }
        Ok(())
    }

    /// Bring `roots` up to date: run every stale node reachable from them,
    /// including children declared while running, through a process pool.
    pub fn update(&mut self, roots: &[NodeId], options: &Options) -> anyhow::Result<Summary> {
        trace::scope("update", || {
            // Failures from an earlier pass get another try.
            for node in self.registry.borrow_mut().nodes.values_mut() {
                if node.status == Status::Failed {
                    node.status = Status::Dirty;
                }
            }

            let pool = Rc::new(ProcessPool::new(options.parallelism));
            let mut exec = LocalPool::new();
            let walker = self.walker(Mode::Execute(pool.clone()), options, &exec);
            walker.start(roots)?;
            pool.wait(&mut exec, || walker.check())?;
            walker.finish()?;
            Ok(walker.summary())
        })
    }
}
