//! Drives one node through a pass: wait for its inputs, run its update
//! body, wait for the children the body declared, then exit.

use crate::error::{is_recoverable, CommandFailed, Recoverable};
use crate::graph::{update_fn, NodeId, Status, UpdateFn};
use crate::process::Command;
use crate::walk::{Mode, Walker};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

pub(crate) struct Task {
    walker: Rc<Walker>,
    id: NodeId,
    inputs: Vec<String>,
    outputs: Vec<String>,
    /// Nodes declared by the update body, in declaration order.
    children: RefCell<Vec<NodeId>>,
    /// Recoverable error raised by the update body.
    error: RefCell<Option<anyhow::Error>>,
}

impl Task {
    pub fn new(walker: Rc<Walker>, id: NodeId, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Task {
            walker,
            id,
            inputs,
            outputs,
            children: Default::default(),
            error: Default::default(),
        }
    }

    /// The whole life of the task, as spawned on the executor.  Fatal errors
    /// are handed to the walker, which aborts the pass.
    pub async fn visit(self: Rc<Self>, body: Option<UpdateFn>) {
        let walker = self.walker.clone();
        if let Err(err) = self.visit_impl(body).await {
            walker.abort(err);
        }
    }

    async fn visit_impl(self: Rc<Self>, body: Option<UpdateFn>) -> anyhow::Result<()> {
        let input_failed = self.walker.wait_on_paths(&self.inputs).await?;

        if !input_failed {
            if let Some(body) = body {
                let ctx = Context { task: self.clone() };
                if let Err(err) = body(ctx).await {
                    if !is_recoverable(&err) {
                        return Err(err.context(self.describe()));
                    }
                    *self.error.borrow_mut() = Some(err);
                }
            }
        }

        let children = self.children.borrow().clone();
        let child_failed = self.walker.wait_for_nodes(&children).await;
        self.exit(input_failed || child_failed)
    }

    fn exit(&self, dependency_failed: bool) -> anyhow::Result<()> {
        let err = self.error.borrow_mut().take();
        let failed = err.is_some() || dependency_failed;
        {
            let mut reg = self.walker.registry.borrow_mut();
            let node = &mut reg.nodes[self.id];
            if failed {
                node.mark_failed();
            } else if self.walker.executes() {
                node.mark_clean();
            }
            // Commit what the commands left on disk.
            node.io.update(&*self.walker.fs)?;
            self.walker
                .progress
                .task_finished(self.id, node, node.status(), err.as_ref());
        }
        self.walker.exit(self.id, &self.outputs, failed);
        Ok(())
    }

    fn describe(&self) -> String {
        match self.outputs.first() {
            Some(out) => format!("updating {}", out),
            None => format!("updating node {:?}", self.id),
        }
    }

    fn status(&self) -> Status {
        self.walker.registry.borrow().nodes[self.id].status()
    }
}

/// What an update body can do: declare children and run commands.
#[derive(Clone)]
pub struct Context {
    task: Rc<Task>,
}

impl Context {
    pub fn id(&self) -> NodeId {
        self.task.id
    }

    pub fn inputs(&self) -> &[String] {
        &self.task.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.task.outputs
    }

    /// False during discovery, when commands are skipped.
    pub fn executes(&self) -> bool {
        self.task.walker.executes()
    }

    /// Declare an existing node as a child of this one and start it if it
    /// needs work.  This node does not finish until the child has.
    pub fn add_child(&self, child: NodeId) -> anyhow::Result<()> {
        self.task.children.borrow_mut().push(child);
        self.task.walker.update_if_needed(child)
    }

    /// Register a node (deduplicated as usual) and declare it as a child.
    pub fn add_node<F, Fut>(
        &self,
        inputs: &[&str],
        outputs: &[&str],
        body: F,
    ) -> anyhow::Result<NodeId>
    where
        F: Fn(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let id = self
            .task
            .walker
            .registry
            .borrow_mut()
            .add(inputs, outputs, Some(update_fn(body)))?;
        self.add_child(id)?;
        Ok(id)
    }

    /// Run a command to completion.  Children declared so far finish first;
    /// if one of them failed the command is not started.
    ///
    /// Outside an execute pass, or for a node that isn't dirty, this does
    /// nothing and succeeds.
    pub async fn run(&self, cmd: Command) -> anyhow::Result<()> {
        let pool = match &self.task.walker.mode {
            Mode::Discover => return Ok(()),
            Mode::Execute(pool) => pool.clone(),
        };
        if self.task.status() != Status::Dirty {
            return Ok(());
        }

        let children = self.task.children.borrow().clone();
        if self.task.walker.wait_for_nodes(&children).await {
            return Err(Recoverable(format!("{}: a dependency failed", cmd.display())).into());
        }

        let walker = &self.task.walker;
        let on_start = {
            let (progress, id, cmd) = (walker.progress.clone(), self.task.id, cmd.clone());
            move || progress.command_started(id, &cmd)
        };
        let result = pool.run_with_start(cmd.clone(), on_start).await;
        match result {
            Ok(status) => {
                walker.progress.command_finished(self.task.id, &cmd, status);
                walker.count_command();
                if status.success() {
                    Ok(())
                } else {
                    Err(CommandFailed {
                        argv: cmd.argv,
                        status,
                    }
                    .into())
                }
            }
            Err(err) => {
                Err(Recoverable(format!("spawn {}: {}", cmd.display(), err)).into())
            }
        }
    }
}
