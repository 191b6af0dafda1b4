//! Runs commands as external processes, at most `limit` at a time.
//!
//! All processes of a pool share one process group, so the pool can block on
//! "any of mine exited" with a single call.  Commands are queued by
//! suspended tasks; each finished process resumes exactly the task that
//! queued it.

use crate::process::{spawn, wait_group, Command, Pid};
use crate::trace;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::process::ExitStatus;
use std::time::Instant;

type Done = oneshot::Sender<std::io::Result<ExitStatus>>;

/// Called once the command's process exists.
type OnStart = Box<dyn FnOnce()>;

/// Tracks faked "thread ids" -- integers assigned to running processes to
/// track parallelism in perf trace output.
#[derive(Default)]
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

struct Queued {
    cmd: Command,
    on_start: OnStart,
    done: Done,
}

struct Running {
    name: String,
    tid: usize,
    start: Instant,
    done: Done,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Queued>,
    running: FxHashMap<Pid, Running>,
    /// Set by the first spawn, joined by the rest.  Cleared when the last
    /// member is reaped, since an empty group can't be joined.
    group: Option<Pid>,
    tids: ThreadIds,
    /// High-water mark of `running`.
    peak: usize,
}

pub struct ProcessPool {
    limit: usize,
    state: RefCell<PoolState>,
}

impl ProcessPool {
    pub fn new(limit: usize) -> Self {
        ProcessPool {
            limit: limit.max(1),
            state: Default::default(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn running(&self) -> usize {
        self.state.borrow().running.len()
    }

    pub fn queued(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Most processes that were ever running at once.
    pub fn peak(&self) -> usize {
        self.state.borrow().peak
    }

    /// Queue `cmd` and suspend until it exits.  An Err means the process
    /// could not be spawned.
    pub async fn run(&self, cmd: Command) -> std::io::Result<ExitStatus> {
        self.run_with_start(cmd, || {}).await
    }

    /// Like run, calling `on_start` when the process is actually spawned
    /// rather than when it is queued.  Not called if spawning fails.
    pub async fn run_with_start(
        &self,
        cmd: Command,
        on_start: impl FnOnce() + 'static,
    ) -> std::io::Result<ExitStatus> {
        let (done, exited) = oneshot::channel();
        self.state.borrow_mut().queue.push_back(Queued {
            cmd,
            on_start: Box::new(on_start),
            done,
        });
        self.schedule();
        match exited.await {
            Ok(result) => result,
            Err(oneshot::Canceled) => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "process pool shut down",
            )),
        }
    }

    /// Spawn queued commands while there is room.  Returns how many were
    /// taken off the queue, spawned or not.
    pub fn schedule(&self) -> usize {
        let mut started = Vec::new();
        let taken = {
            let mut state = self.state.borrow_mut();
            self.spawn_ready(&mut state, &mut started)
        };
        // Observers may look at the pool, so call them unborrowed.
        for on_start in started {
            on_start();
        }
        taken
    }

    fn spawn_ready(&self, state: &mut PoolState, started: &mut Vec<OnStart>) -> usize {
        let mut taken = 0;
        while state.running.len() < self.limit {
            let Some(Queued { cmd, on_start, done }) = state.queue.pop_front() else {
                break;
            };
            taken += 1;
            if state.running.is_empty() {
                state.group = None;
            }
            match spawn(&cmd, state.group) {
                Ok(pid) => {
                    if state.group.is_none() {
                        state.group = Some(pid);
                    }
                    let tid = state.tids.claim();
                    state.running.insert(
                        pid,
                        Running {
                            name: cmd.display(),
                            tid,
                            start: Instant::now(),
                            done,
                        },
                    );
                    state.peak = state.peak.max(state.running.len());
                    started.push(on_start);
                }
                Err(err) => {
                    let _ = done.send(Err(err));
                }
            }
        }
        taken
    }

    /// Drive `exec` until no process remains: run every task that can make
    /// progress, fill free slots, then block for the next process exit and
    /// resume its waiter.  `check` runs after each round and can end the
    /// wait early.
    ///
    /// A reaped command's waiter runs before its slot is refilled, so
    /// observers see a finish before the start that replaces it.
    pub fn wait(
        &self,
        exec: &mut LocalPool,
        mut check: impl FnMut() -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        loop {
            exec.run_until_stalled();
            check()?;
            if self.schedule() > 0 {
                // Failed spawns resolve their waiters immediately.
                continue;
            }

            let group = {
                let state = self.state.borrow();
                if state.running.is_empty() {
                    break;
                }
                state.group
            };
            let Some(group) = group else {
                anyhow::bail!("processes running outside a process group");
            };

            let (pid, status) = wait_group(group)?;
            let finished = self.state.borrow_mut().running.remove(&pid);
            if let Some(Running {
                name,
                tid,
                start,
                done,
            }) = finished
            {
                self.state.borrow_mut().tids.release(tid);
                trace::write_complete(&name, tid, start, Instant::now());
                // The waiter may be gone if its pass was aborted.
                let _ = done.send(Ok(status));
            }
        }
        Ok(())
    }
}
