//! Primary/backup replication of a [`StateMachine`][crate::StateMachine].
//!
//! A replica learns of every newly committed view from its acceptor and
//! enters a view change. Its recovery loop then syncs it with the rest of the
//! view: backups pull the primary's state, unless they hold it already, and
//! report back. Once every backup reported back, the primary serves clients
//! again.
//!
//! Client operations are accepted by the primary only. It stamps each with
//! the next [`Viewstamp`], forwards it to all backups, and executes it only
//! once every backup executed it. A backup executes exclusively the operation
//! stamped with the viewstamp it expects next.

pub mod builder;
mod handle;
mod keeper;
mod msg;
mod recovery;
mod req_handler;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::FutureExt;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;

use crate::acceptor;
use crate::acceptor::AcceptorHandle;
use crate::communicator::JoinReply;
use crate::communicator::Members;
use crate::communicator::ReplicaCommunicator;
use crate::config::Config;
use crate::error::ChangeError;
use crate::error::InvokeError;
use crate::error::JoinError;
use crate::error::RunError;
use crate::error::ShutDown;
use crate::fault::Checkpoint;
use crate::fault::Faults;
use crate::fault::Verdict;
use crate::util::timeout;
use crate::view::NodeAddr;
use crate::view::View;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;

pub use builder::builder;
pub use req_handler::RequestHandler;

use handle::KeeperHandle;
use msg::Request;
use msg::Response;

type RequestAndResponseSender = (Request, oneshot::Sender<Response>);

/// Snapshot of a replica's bookkeeping.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicaStatus {
    pub me: NodeAddr,
    /// Latest committed view, `0` before the first.
    pub vid: ViewId,
    pub view: View,
    pub primary: Option<NodeAddr>,
    pub is_member: bool,
    pub in_view_change: bool,
    /// Whether the primary is collecting transfer acknowledgements.
    pub in_sync: bool,
    pub last_applied: Viewstamp,
    pub next_expected: Viewstamp,
}

impl ReplicaStatus {
    pub fn is_primary(&self) -> bool {
        self.primary.as_ref() == Some(&self.me)
    }
}

/// How long a replica waits for other nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Replication, state transfer and Paxos requests.
    pub call: Duration,
    /// Admission to a view, which involves a run of Paxos on the primary's
    /// side.
    pub join: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(1),
            join: Duration::from_secs(120),
        }
    }
}

/// A node of the replicated state machine.
///
/// Cloning is cheap, clones drive the same node.
pub struct Replica<C: ReplicaCommunicator> {
    me: NodeAddr,
    keeper: KeeperHandle,
    config: Config<C>,
    communicator: C,
    faults: Arc<dyn Faults>,
    timeouts: Timeouts,

    // serializes client operations from viewstamp assignment to execution
    invoking: Arc<futures::lock::Mutex<()>>,
}

impl<C: ReplicaCommunicator> Clone for Replica<C> {
    fn clone(&self) -> Self {
        Self {
            me: self.me.clone(),
            keeper: self.keeper.clone(),
            config: self.config.clone(),
            communicator: self.communicator.clone(),
            faults: Arc::clone(&self.faults),
            timeouts: self.timeouts,

            invoking: Arc::clone(&self.invoking),
        }
    }
}

impl<C: ReplicaCommunicator> Replica<C> {
    pub fn me(&self) -> &NodeAddr {
        &self.me
    }

    pub fn config(&self) -> &Config<C> {
        &self.config
    }

    fn acceptor(&self) -> &AcceptorHandle<View> {
        self.config.acceptor()
    }

    pub fn status(&self) -> impl Future<Output = Result<ReplicaStatus, ShutDown>> {
        self.keeper.status()
    }

    pub fn members(&self) -> impl Future<Output = Result<Members, ShutDown>> {
        self.keeper.members()
    }

    /// Answers requests of other replicas and clients.
    pub fn request_handler(&self) -> RequestHandler {
        RequestHandler::new(self.clone())
    }

    /// Answers Paxos requests of other replicas.
    pub fn acceptor_request_handler(&self) -> acceptor::RequestHandler<View> {
        acceptor::RequestHandler::new(self.acceptor().clone())
    }

    /// Executes an operation on all replicas of the current view.
    ///
    /// Only the primary accepts operations, and only while it is not
    /// changing views. The operation is executed by the primary only after
    /// every backup executed it. If any backup fails to, the operation isn't
    /// executed by the primary and `Busy` is returned.
    pub async fn invoke(&self, proc: ProcId, args: Vec<u8>) -> Result<Vec<u8>, InvokeError> {
        let _invoking = self.invoking.lock().await;

        let (vs, backups) = self.keeper.begin_invoke().await?;

        let mut communicator = self.communicator.clone();
        let call_timeout = self.timeouts.call;

        let replies = backups
            .iter()
            .map(|backup| {
                let reply = communicator.send_replicate(backup, proc, vs, args.clone());

                timeout(call_timeout, reply).map(move |r| (backup, r))
            })
            .collect::<FuturesUnordered<_>>()
            .collect::<Vec<_>>()
            .await;

        let mut replicated = true;

        for (backup, reply) in replies {
            match reply {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::info!("Backup {} refused operation {}: {}", backup, vs, e);
                    replicated = false;
                }
                Ok(Err(e)) => {
                    tracing::info!("Replicating {} to {} failed: {:?}", vs, backup, e);
                    replicated = false;
                }
                Err(_) => {
                    tracing::info!("Replicating {} to {} timed out.", vs, backup);
                    replicated = false;
                }
            }
        }

        if !replicated {
            return Err(InvokeError::Busy);
        }

        if let Verdict::Crash = self.faults.at(&self.me, Checkpoint::AfterReplicate) {
            return Err(InvokeError::Crashed(Checkpoint::AfterReplicate));
        }

        self.keeper.execute_primary(vs, proc, args).await
    }

    /// Agrees on a view without `node`, e.g. because it crashed.
    pub async fn remove(&self, node: &NodeAddr) -> Result<ViewId, ChangeError> {
        self.config.remove(node).await
    }

    /// Stops the node. Requests to it fail with `ShutDown` afterwards.
    pub async fn shut_down(&self) {
        let _ = self.keeper.shut_down().await;
        let _ = self.acceptor().shut_down().await;
    }

    /// Admits `node` to the view, if this node is the primary.
    ///
    /// Resolves to the decided view history, which the joiner restores. Nodes
    /// that are members already receive the history right away.
    async fn admit(&self, node: NodeAddr, last: Viewstamp) -> Result<JoinReply, JoinError> {
        if self.config.is_member(&node).await? {
            return Ok(JoinReply {
                history: self.config.dump().await?,
            });
        }

        let status = self.keeper.status().await?;

        if !status.is_primary() {
            tracing::debug!("Node {} can't admit {}, it is not primary.", self.me, node);

            return Err(JoinError::Busy);
        }

        tracing::info!("Primary {} admits {} (at {}).", self.me, node, last);

        match self.config.add(node.clone()).await {
            Ok(vid) => {
                tracing::info!("Node {} joined as of view {}.", node, vid);

                Ok(JoinReply {
                    history: self.config.dump().await?,
                })
            }
            Err(ChangeError::Run(RunError::AlreadyRunning)) => Err(JoinError::Busy),
            Err(ChangeError::ShutDown) | Err(ChangeError::Run(RunError::ShutDown)) => {
                Err(JoinError::ShutDown)
            }
            Err(e) => {
                tracing::info!("Primary {} failed to admit {}: {}", self.me, node, e);

                Err(JoinError::Rejected)
            }
        }
    }
}
