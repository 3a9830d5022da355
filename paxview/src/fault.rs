//! Fault injection.
//!
//! Proposers and replicas consult a [`Faults`] strategy at fixed
//! [`Checkpoint`]s. A [`Verdict::Crash`] aborts the operation in progress as
//! if the node died right there: nothing past the checkpoint is executed and
//! the operation fails with a `Crashed` error. Harnesses emulate the process
//! going away by isolating the node afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::view::NodeAddr;

/// Points in the protocols at which faults may be injected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Checkpoint {
    /// A proposer gathered a majority of promises and is about to send its
    /// accept requests.
    BeforeAccept,
    /// A proposer gathered a majority of acceptances and is about to send its
    /// decide requests.
    BeforeDecide,
    /// A primary replicated an operation to all backups and is about to
    /// execute it itself.
    AfterReplicate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Proceed,
    Crash,
}

pub trait Faults: Send + Sync + 'static {
    /// Called when `node` reaches `checkpoint`.
    ///
    /// Implementations may block, e.g. to let a test interleave other nodes'
    /// actions deterministically.
    fn at(&self, node: &NodeAddr, checkpoint: Checkpoint) -> Verdict;
}

impl<F: Faults + ?Sized> Faults for Arc<F> {
    fn at(&self, node: &NodeAddr, checkpoint: Checkpoint) -> Verdict {
        (**self).at(node, checkpoint)
    }
}

/// Never injects a fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl Faults for NoFaults {
    fn at(&self, _node: &NodeAddr, _checkpoint: Checkpoint) -> Verdict {
        Verdict::Proceed
    }
}

/// Crashes once at each armed checkpoint.
#[derive(Debug, Default)]
pub struct Breakpoints {
    armed: Mutex<HashSet<Checkpoint>>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, checkpoint: Checkpoint) {
        self.lock().insert(checkpoint);
    }

    pub fn is_armed(&self, checkpoint: Checkpoint) -> bool {
        self.lock().contains(&checkpoint)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Checkpoint>> {
        // the set stays consistent even if a holder panicked
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Faults for Breakpoints {
    fn at(&self, node: &NodeAddr, checkpoint: Checkpoint) -> Verdict {
        if self.lock().remove(&checkpoint) {
            tracing::info!("Node {} crashes at {:?}.", node, checkpoint);

            Verdict::Crash
        } else {
            Verdict::Proceed
        }
    }
}
