//! N-way completion join: one waiter, many producers.
//!
//! A gate is armed once per producer it waits on and fires a one-shot
//! channel when the last producer reports, so producers may finish in any
//! order and the waiter is woken exactly once.

use futures::channel::oneshot;
use std::cell::RefCell;

struct GateState {
    count: usize,
    failed: bool,
    waiter: Option<oneshot::Sender<bool>>,
}

pub struct JoinGate {
    state: RefCell<GateState>,
}

/// The waiting half of a gate.
pub struct GateWait(oneshot::Receiver<bool>);

impl JoinGate {
    /// Create a gate expecting `count` reports, bound to the returned waiter.
    pub fn new(count: usize) -> (JoinGate, GateWait) {
        let (tx, rx) = oneshot::channel();
        let gate = JoinGate {
            state: RefCell::new(GateState {
                count,
                failed: false,
                waiter: Some(tx),
            }),
        };
        (gate, GateWait(rx))
    }

    /// Expect one more report.
    pub fn arm(&self) {
        self.state.borrow_mut().count += 1;
    }

    /// Record a failure without a matching report, e.g. a producer that has
    /// already failed before the waiter arrived.
    pub fn fail(&self) {
        self.state.borrow_mut().failed = true;
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.state.borrow().count
    }

    /// One producer finished.  Fires the waiter when this was the last one.
    pub fn report(&self, failed: bool) {
        let mut state = self.state.borrow_mut();
        debug_assert!(state.count > 0, "gate reported more often than armed");
        if state.count == 0 {
            return;
        }
        state.count -= 1;
        state.failed |= failed;
        if state.count == 0 {
            Self::fire(&mut state);
        }
    }

    fn fire(state: &mut GateState) {
        if let Some(tx) = state.waiter.take() {
            // The receiver may be gone if the traversal was aborted.
            let _ = tx.send(state.failed);
        }
    }

    /// Suspend until every armed producer has reported; returns whether any
    /// of them failed.  Does not suspend if nothing is pending.
    pub async fn wait(&self, waiter: GateWait) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.count == 0 {
                Self::fire(&mut state);
            }
        }
        // A dropped sender means the gate died with an aborted traversal;
        // treat that as failure rather than success.
        waiter.0.await.unwrap_or(true)
    }
}
