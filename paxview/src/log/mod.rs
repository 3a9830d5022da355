//! Durable acceptor state.
//!
//! An acceptor must not answer a request before the state change it implies
//! was logged. On restart the log is [replayed][AcceptorLog::replay] to
//! restore the promises and acceptances given as well as the history of
//! decided values.

mod file;
mod io;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::IoError;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::Value;

pub use file::FileLog;

pub trait AcceptorLog<V: Value>: Send + 'static {
    /// Records that `n` was promised for `instance`.
    fn log_promise(&mut self, instance: Instance, n: &ProposalNum) -> Result<(), IoError>;

    /// Records that proposal `n` with `value` was accepted for `instance`.
    fn log_accept(&mut self, instance: Instance, n: &ProposalNum, value: &V)
        -> Result<(), IoError>;

    /// Records that `value` was decided for `instance`.
    fn log_commit(&mut self, instance: Instance, value: &V) -> Result<(), IoError>;

    /// Reads back everything logged so far.
    fn replay(&mut self) -> Result<Replayed<V>, IoError>;
}

impl<V: Value> AcceptorLog<V> for Box<dyn AcceptorLog<V>> {
    fn log_promise(&mut self, instance: Instance, n: &ProposalNum) -> Result<(), IoError> {
        (**self).log_promise(instance, n)
    }

    fn log_accept(
        &mut self,
        instance: Instance,
        n: &ProposalNum,
        value: &V,
    ) -> Result<(), IoError> {
        (**self).log_accept(instance, n, value)
    }

    fn log_commit(&mut self, instance: Instance, value: &V) -> Result<(), IoError> {
        (**self).log_commit(instance, value)
    }

    fn replay(&mut self) -> Result<Replayed<V>, IoError> {
        (**self).replay()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record<V> {
    Promise {
        instance: Instance,
        n: ProposalNum,
    },
    Accept {
        instance: Instance,
        n: ProposalNum,
        value: V,
    },
    Commit {
        instance: Instance,
        value: V,
    },
}

/// Acceptor state restored from a log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Replayed<V> {
    pub committed: BTreeMap<Instance, V>,
    /// Highest promise for the instance following the last committed one.
    pub promised: ProposalNum,
    /// Last acceptance for the instance following the last committed one.
    pub accepted: Option<(ProposalNum, V)>,
}

impl<V> Default for Replayed<V> {
    fn default() -> Self {
        Self {
            committed: BTreeMap::new(),
            promised: ProposalNum::zero(),
            accepted: None,
        }
    }
}

impl<V> Replayed<V> {
    pub fn highest_committed(&self) -> Instance {
        self.committed.keys().next_back().copied().unwrap_or(0)
    }

    /// Folds `record` into the replayed state.
    ///
    /// Records concerning instances other than the open one are ignored,
    /// they are left over from before the instance was decided.
    pub(crate) fn apply(&mut self, record: Record<V>) {
        let open = self.highest_committed() + 1;

        match record {
            Record::Promise { instance, n } => {
                if instance == open && n > self.promised {
                    self.promised = n;
                }
            }
            Record::Accept { instance, n, value } => {
                if instance == open {
                    if n > self.promised {
                        self.promised = n.clone();
                    }
                    self.accepted = Some((n, value));
                }
            }
            Record::Commit { instance, value } => {
                if instance == open {
                    self.committed.insert(instance, value);
                    self.promised = ProposalNum::zero();
                    self.accepted = None;
                }
            }
        }
    }
}

/// A log that lives in memory only.
///
/// Clones share their records. An acceptor spawned from a clone of the log
/// of an acceptor that was shut down resumes where the latter left off.
#[derive(Debug)]
pub struct EphemeralLog<V> {
    records: Arc<Mutex<Vec<Record<V>>>>,
}

impl<V> EphemeralLog<V> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Record<V>>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<V> Clone for EphemeralLog<V> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<V> Default for EphemeralLog<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Value> AcceptorLog<V> for EphemeralLog<V> {
    fn log_promise(&mut self, instance: Instance, n: &ProposalNum) -> Result<(), IoError> {
        self.lock().push(Record::Promise {
            instance,
            n: n.clone(),
        });
        Ok(())
    }

    fn log_accept(
        &mut self,
        instance: Instance,
        n: &ProposalNum,
        value: &V,
    ) -> Result<(), IoError> {
        self.lock().push(Record::Accept {
            instance,
            n: n.clone(),
            value: value.clone(),
        });
        Ok(())
    }

    fn log_commit(&mut self, instance: Instance, value: &V) -> Result<(), IoError> {
        self.lock().push(Record::Commit {
            instance,
            value: value.clone(),
        });
        Ok(())
    }

    fn replay(&mut self) -> Result<Replayed<V>, IoError> {
        let mut replayed = Replayed::default();

        for r in self.lock().iter().cloned() {
            replayed.apply(r);
        }

        Ok(replayed)
    }
}
