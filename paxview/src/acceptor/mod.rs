//! The acceptor role of Paxos.
//!
//! Each node runs one acceptor. It holds the history of decided values,
//! keyed by instance, and the promise and acceptance for the single instance
//! that is still open, i.e. the one following the highest decided instance.
//! All of it is owned by a single task which is driven through an
//! [`AcceptorHandle`].

mod handle;
mod msg;
mod req_handler;

use std::collections::BTreeMap;

use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde::Serialize;

use crate::error::AcceptorError;
use crate::error::IoError;
use crate::error::SpawnError;
use crate::executor::Executor;
use crate::log::AcceptorLog;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::view::NodeAddr;
use crate::Value;

pub use handle::AcceptorHandle;
pub use req_handler::RequestHandler;

use msg::Request;
use msg::Response;

type RequestAndResponseSender<V> = (Request<V>, oneshot::Sender<Response<V>>);

/// Answer to a prepare request.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum PrepareReply<V> {
    /// The proposal number was promised. Carries the last proposal accepted
    /// for the instance, if any.
    Promise { accepted: Option<(ProposalNum, V)> },
    /// A proposal number at least as great was promised before.
    Rejected { promised: ProposalNum },
    /// The instance was decided already. Carries the decided values from the
    /// requested instance onwards.
    Stale { decided: Vec<(Instance, V)> },
    /// The acceptor has yet to learn of instances preceding the requested
    /// one.
    Behind { highest: Instance },
}

/// Answer to an accept request.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum AcceptReply {
    Accepted,
    Rejected { promised: ProposalNum },
    Stale { highest: Instance },
    Behind { highest: Instance },
}

/// Answer to a decide request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum DecideReply {
    Committed,
    AlreadyCommitted,
    /// Deciding the instance would leave a gap. The acceptor needs to be
    /// caught up first.
    Behind { highest: Instance },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AcceptorStatus {
    /// Highest decided instance, `0` if none was decided.
    pub highest: Instance,
    /// Highest promise given for the open instance.
    pub promised: ProposalNum,
}

/// Upcall invoked for every decided instance, in order.
///
/// Invoked from within the acceptor's task. Implementations must not block.
pub trait CommitListener<V>: Send + 'static {
    fn on_commit(&mut self, instance: Instance, value: &V);
}

impl<V> CommitListener<V> for () {
    fn on_commit(&mut self, _instance: Instance, _value: &V) {}
}

impl<V: Clone + Send + 'static> CommitListener<V> for mpsc::UnboundedSender<(Instance, V)> {
    fn on_commit(&mut self, instance: Instance, value: &V) {
        if self.unbounded_send((instance, value.clone())).is_err() {
            tracing::debug!("Commit listener for instance {} is gone.", instance);
        }
    }
}

/// Everything needed to spawn an acceptor.
pub struct SpawnArgs<V, L, N> {
    pub me: NodeAddr,
    pub log: L,
    pub listener: N,
    /// Value to decide for instance `1` if the log is empty.
    pub bootstrap: Option<V>,
}

pub struct Acceptor<V: Value, L: AcceptorLog<V>> {
    me: NodeAddr,
    receiver: mpsc::Receiver<RequestAndResponseSender<V>>,
    log: L,
    listener: Box<dyn CommitListener<V>>,

    decided: BTreeMap<Instance, V>,
    highest: Instance,

    // state of instance `highest + 1`
    promised: ProposalNum,
    accepted: Option<(ProposalNum, V)>,
}

impl<V: Value, L: AcceptorLog<V>> Acceptor<V, L> {
    /// Replays the log and spawns the acceptor's task.
    ///
    /// The listener is informed of every instance decided before, in order,
    /// before this function returns.
    pub fn spawn<N: CommitListener<V>, E: Executor>(
        args: SpawnArgs<V, L, N>,
        executor: &E,
    ) -> Result<AcceptorHandle<V>, SpawnError> {
        let SpawnArgs {
            me,
            mut log,
            listener,
            bootstrap,
        } = args;

        let replayed = log.replay()?;
        let highest = replayed.highest_committed();

        let (sender, receiver) = mpsc::channel(32);

        let mut acceptor = Acceptor {
            me,
            receiver,
            log,
            listener: Box::new(listener),

            decided: BTreeMap::new(),
            highest: 0,

            promised: replayed.promised,
            accepted: replayed.accepted,
        };

        for (instance, value) in replayed.committed {
            acceptor.listener.on_commit(instance, &value);
            acceptor.decided.insert(instance, value);
            acceptor.highest = instance;
        }

        tracing::info!(
            "Acceptor {} resumes after instance {} with promise {}.",
            acceptor.me,
            highest,
            acceptor.promised
        );

        if let Some(value) = bootstrap {
            if acceptor.highest == 0 {
                tracing::info!("Acceptor {} bootstraps instance 1.", acceptor.me);

                acceptor.commit(1, value)?;
            }
        }

        executor
            .execute(acceptor.run())
            .map_err(|e| SpawnError::Executor(Box::new(e)))?;

        Ok(AcceptorHandle::new(sender))
    }

    async fn run(mut self) {
        while let Some((req, resp_sender)) = self.receiver.next().await {
            if let Request::ShutDown = req {
                let _ = resp_sender.send(Response::ShutDown(Ok(())));
                break;
            }

            let resp = self.handle_request(req);

            let _ = resp_sender.send(resp);
        }

        tracing::info!("Acceptor {} shutting down.", self.me);
    }

    fn handle_request(&mut self, req: Request<V>) -> Response<V> {
        match req {
            Request::Prepare { instance, n } => Response::Prepare(self.prepare(instance, n)),
            Request::Accept { instance, n, value } => {
                Response::Accept(self.accept(instance, n, value))
            }
            Request::Decide { instance, value } => Response::Decide(self.decide(instance, value)),

            Request::CatchUp { decided } => Response::CatchUp(self.catch_up(decided)),

            Request::Status => Response::Status(Ok(AcceptorStatus {
                highest: self.highest,
                promised: self.promised.clone(),
            })),
            Request::Latest => Response::Latest(Ok(self
                .decided
                .get(&self.highest)
                .map(|v| (self.highest, v.clone())))),
            Request::Decided { instance } => {
                Response::Decided(Ok(self.decided.get(&instance).cloned()))
            }
            Request::History { since } => Response::History(Ok(self.history(since))),

            Request::ShutDown => Response::ShutDown(Ok(())),
        }
    }

    fn history(&self, since: Instance) -> Vec<(Instance, V)> {
        self.decided
            .range(since..)
            .map(|(i, v)| (*i, v.clone()))
            .collect()
    }

    fn prepare(&mut self, instance: Instance, n: ProposalNum) -> Result<PrepareReply<V>, AcceptorError> {
        if instance <= self.highest {
            tracing::debug!(
                "Acceptor {} answers stale prepare for instance {} (highest is {}).",
                self.me,
                instance,
                self.highest
            );

            return Ok(PrepareReply::Stale {
                decided: self.history(instance),
            });
        }

        if instance > self.highest + 1 {
            tracing::debug!(
                "Acceptor {} is behind instance {} (highest is {}).",
                self.me,
                instance,
                self.highest
            );

            return Ok(PrepareReply::Behind {
                highest: self.highest,
            });
        }

        if n > self.promised {
            self.log.log_promise(instance, &n)?;

            tracing::debug!("Acceptor {} promises {} for instance {}.", self.me, n, instance);
            self.promised = n;

            Ok(PrepareReply::Promise {
                accepted: self.accepted.clone(),
            })
        } else {
            tracing::debug!(
                "Acceptor {} rejects {} for instance {}, promised {}.",
                self.me,
                n,
                instance,
                self.promised
            );

            Ok(PrepareReply::Rejected {
                promised: self.promised.clone(),
            })
        }
    }

    fn accept(
        &mut self,
        instance: Instance,
        n: ProposalNum,
        value: V,
    ) -> Result<AcceptReply, AcceptorError> {
        if instance <= self.highest {
            return Ok(AcceptReply::Stale {
                highest: self.highest,
            });
        }

        if instance > self.highest + 1 {
            return Ok(AcceptReply::Behind {
                highest: self.highest,
            });
        }

        if n >= self.promised {
            self.log.log_accept(instance, &n, &value)?;

            tracing::debug!("Acceptor {} accepts {} for instance {}.", self.me, n, instance);
            self.promised = n.clone();
            self.accepted = Some((n, value));

            Ok(AcceptReply::Accepted)
        } else {
            tracing::debug!(
                "Acceptor {} refuses {} for instance {}, promised {}.",
                self.me,
                n,
                instance,
                self.promised
            );

            Ok(AcceptReply::Rejected {
                promised: self.promised.clone(),
            })
        }
    }

    fn decide(&mut self, instance: Instance, value: V) -> Result<DecideReply, AcceptorError> {
        if instance <= self.highest {
            return Ok(DecideReply::AlreadyCommitted);
        }

        if instance > self.highest + 1 {
            tracing::info!(
                "Acceptor {} can't decide instance {} before {}.",
                self.me,
                instance,
                self.highest + 1
            );

            return Ok(DecideReply::Behind {
                highest: self.highest,
            });
        }

        self.commit(instance, value)?;

        Ok(DecideReply::Committed)
    }

    fn catch_up(&mut self, decided: Vec<(Instance, V)>) -> Result<Instance, AcceptorError> {
        for (instance, value) in decided {
            if instance <= self.highest {
                continue;
            }

            if instance > self.highest + 1 {
                tracing::warn!(
                    "Acceptor {} can't catch up to instance {} from {}.",
                    self.me,
                    instance,
                    self.highest
                );
                break;
            }

            self.commit(instance, value)?;
        }

        Ok(self.highest)
    }

    fn commit(&mut self, instance: Instance, value: V) -> Result<(), IoError> {
        assert_eq!(
            instance,
            self.highest + 1,
            "gap in decided instances: {} follows {}",
            instance,
            self.highest
        );

        self.log.log_commit(instance, &value)?;

        tracing::info!("Acceptor {} commits instance {}: {:?}", self.me, instance, value);

        self.highest = instance;
        self.promised = ProposalNum::zero();
        self.accepted = None;

        let value = self.decided.entry(instance).or_insert(value);
        self.listener.on_commit(instance, value);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::stream::StreamExt;

    use super::AcceptReply;
    use super::Acceptor;
    use super::AcceptorHandle;
    use super::DecideReply;
    use super::PrepareReply;
    use super::SpawnArgs;
    use crate::executor::StdThread;
    use crate::log::EphemeralLog;
    use crate::proposal::Instance;
    use crate::proposal::ProposalNum;

    type Commits = mpsc::UnboundedReceiver<(Instance, String)>;

    fn n(round: u64, proposer: &str) -> ProposalNum {
        ProposalNum::new(round, proposer.into())
    }

    fn spawn(log: EphemeralLog<String>) -> (AcceptorHandle<String>, Commits) {
        let (send, recv) = mpsc::unbounded();

        let handle = Acceptor::spawn(
            SpawnArgs {
                me: "a".into(),
                log,
                listener: send,
                bootstrap: None,
            },
            &StdThread,
        )
        .unwrap();

        (handle, recv)
    }

    #[test]
    fn never_accepts_below_promise() {
        let (acceptor, _) = spawn(EphemeralLog::new());

        block_on(async {
            let r = acceptor.prepare(1, n(6, "p2")).await.unwrap();
            assert_eq!(r, PrepareReply::Promise { accepted: None });

            let r = acceptor.prepare(1, n(5, "p1")).await.unwrap();
            assert_eq!(
                r,
                PrepareReply::Rejected {
                    promised: n(6, "p2")
                }
            );

            let r = acceptor.accept(1, n(5, "p1"), "x".to_owned()).await.unwrap();
            assert_eq!(
                r,
                AcceptReply::Rejected {
                    promised: n(6, "p2")
                }
            );

            let r = acceptor.accept(1, n(6, "p2"), "y".to_owned()).await.unwrap();
            assert_eq!(r, AcceptReply::Accepted);
        });
    }

    #[test]
    fn promise_reports_accepted_proposal() {
        let (acceptor, _) = spawn(EphemeralLog::new());

        block_on(async {
            acceptor.prepare(1, n(1, "p1")).await.unwrap();
            acceptor.accept(1, n(1, "p1"), "v".to_owned()).await.unwrap();

            let r = acceptor.prepare(1, n(2, "p2")).await.unwrap();
            assert_eq!(
                r,
                PrepareReply::Promise {
                    accepted: Some((n(1, "p1"), "v".to_owned()))
                }
            );
        });
    }

    #[test]
    fn repeated_decide_commits_once() {
        let (acceptor, mut commits) = spawn(EphemeralLog::new());

        block_on(async {
            let r = acceptor.decide(1, "v".to_owned()).await.unwrap();
            assert_eq!(r, DecideReply::Committed);

            let r = acceptor.decide(1, "v".to_owned()).await.unwrap();
            assert_eq!(r, DecideReply::AlreadyCommitted);

            assert_eq!(commits.next().await, Some((1, "v".to_owned())));

            drop(acceptor);
            assert_eq!(commits.next().await, None);
        });
    }

    #[test]
    fn stale_and_behind_instances_are_refused() {
        let (acceptor, _) = spawn(EphemeralLog::new());

        block_on(async {
            acceptor.decide(1, "one".to_owned()).await.unwrap();
            acceptor.decide(2, "two".to_owned()).await.unwrap();

            let r = acceptor.prepare(1, n(9, "p")).await.unwrap();
            assert_eq!(
                r,
                PrepareReply::Stale {
                    decided: vec![(1, "one".to_owned()), (2, "two".to_owned())]
                }
            );

            let r = acceptor.prepare(4, n(9, "p")).await.unwrap();
            assert_eq!(r, PrepareReply::Behind { highest: 2 });

            let r = acceptor.decide(4, "four".to_owned()).await.unwrap();
            assert_eq!(r, DecideReply::Behind { highest: 2 });

            let r = acceptor.accept(2, n(9, "p"), "x".to_owned()).await.unwrap();
            assert_eq!(r, AcceptReply::Stale { highest: 2 });
        });
    }

    #[test]
    fn catch_up_stops_at_gap() {
        let (acceptor, _) = spawn(EphemeralLog::new());

        block_on(async {
            let highest = acceptor
                .catch_up(vec![
                    (1, "one".to_owned()),
                    (2, "two".to_owned()),
                    (4, "four".to_owned()),
                ])
                .await
                .unwrap();

            assert_eq!(highest, 2);
        });
    }

    #[test]
    fn restart_restores_promise_and_history() {
        let log = EphemeralLog::new();

        {
            let (acceptor, _) = spawn(log.clone());

            block_on(async {
                acceptor.decide(1, "one".to_owned()).await.unwrap();
                acceptor.prepare(2, n(7, "p")).await.unwrap();
                acceptor.accept(2, n(7, "p"), "two".to_owned()).await.unwrap();
            });
        }

        let (acceptor, mut commits) = spawn(log);

        block_on(async {
            assert_eq!(commits.next().await, Some((1, "one".to_owned())));

            let r = acceptor.prepare(2, n(7, "p")).await.unwrap();
            assert_eq!(
                r,
                PrepareReply::Rejected {
                    promised: n(7, "p")
                }
            );

            let r = acceptor.prepare(2, n(8, "q")).await.unwrap();
            assert_eq!(
                r,
                PrepareReply::Promise {
                    accepted: Some((n(7, "p"), "two".to_owned()))
                }
            );
        });
    }
}
