//! An in-process transport for tests and experiments.
//!
//! Nodes created from the same [`DirectCommunicators`] reach each other by
//! calling their request handlers directly. Links can be made lossy and slow
//! and nodes can be cut off entirely, emulating partitions and crashes.

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::future::FutureExt;
use futures::lock::Mutex;
use thiserror::Error;

use crate::acceptor;
use crate::acceptor::AcceptReply;
use crate::acceptor::DecideReply;
use crate::acceptor::PrepareReply;
use crate::communicator::ClientCommunicator;
use crate::communicator::Communicator;
use crate::communicator::JoinReply;
use crate::communicator::Members;
use crate::communicator::ReplicaCommunicator;
use crate::communicator::Reply;
use crate::communicator::TransferReply;
use crate::error::InvokeError;
use crate::error::JoinError;
use crate::error::ReplicateError;
use crate::error::TransferError;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::rsm;
use crate::view::NodeAddr;
use crate::view::View;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;
use crate::Value;

type Link = (NodeAddr, NodeAddr);

struct Registry<V> {
    acceptors: HashMap<NodeAddr, acceptor::RequestHandler<V>>,
    replicas: HashMap<NodeAddr, rsm::RequestHandler>,

    unreachable: HashSet<NodeAddr>,
    packet_loss: HashMap<Link, f32>,
    e2e_delay: HashMap<Link, rand_distr::Normal<f32>>,
}

/// A set of nodes that communicate directly.
pub struct DirectCommunicators<V> {
    registry: Arc<Mutex<Registry<V>>>,
    default_packet_loss: f32,
    default_e2e_delay: Option<rand_distr::Normal<f32>>,
}

impl<V> Clone for DirectCommunicators<V> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            default_packet_loss: self.default_packet_loss,
            default_e2e_delay: self.default_e2e_delay,
        }
    }
}

impl<V: Value> Default for DirectCommunicators<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Value> DirectCommunicators<V> {
    /// A reliable, instantaneous network.
    pub fn new() -> Self {
        Self::with_characteristics(0.0, None)
    }

    /// A network that drops messages at rate `packet_loss` and delays them
    /// by a number of milliseconds drawn from `e2e_delay`.
    pub fn with_characteristics(
        packet_loss: f32,
        e2e_delay: Option<rand_distr::Normal<f32>>,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                acceptors: HashMap::new(),
                replicas: HashMap::new(),

                unreachable: HashSet::new(),
                packet_loss: HashMap::new(),
                e2e_delay: HashMap::new(),
            })),
            default_packet_loss: packet_loss,
            default_e2e_delay: e2e_delay,
        }
    }

    pub fn create_communicator_for(&self, me: impl Into<NodeAddr>) -> DirectCommunicator<V> {
        DirectCommunicator {
            set: self.clone(),
            me: me.into(),
        }
    }

    pub fn register_acceptor(&self, node: impl Into<NodeAddr>, handler: acceptor::RequestHandler<V>) {
        let node = node.into();

        futures::executor::block_on(async {
            self.registry.lock().await.acceptors.insert(node, handler);
        });
    }

    pub fn register_replica(&self, node: impl Into<NodeAddr>, handler: rsm::RequestHandler) {
        let node = node.into();

        futures::executor::block_on(async {
            self.registry.lock().await.replicas.insert(node, handler);
        });
    }

    /// Cuts `node` off from all other nodes, or reconnects it.
    pub async fn set_reachable(&self, node: &NodeAddr, reachable: bool) {
        let mut registry = self.registry.lock().await;

        if reachable {
            registry.unreachable.remove(node);
        } else {
            registry.unreachable.insert(node.clone());
        }
    }

    pub async fn set_packet_loss(&self, from: &NodeAddr, to: &NodeAddr, packet_loss: f32) {
        let mut registry = self.registry.lock().await;
        registry
            .packet_loss
            .insert((from.clone(), to.clone()), packet_loss);
    }

    pub async fn set_delay(&self, from: &NodeAddr, to: &NodeAddr, delay: rand_distr::Normal<f32>) {
        let mut registry = self.registry.lock().await;
        registry.e2e_delay.insert((from.clone(), to.clone()), delay);
    }

    /// Carries a message from `from` to `to`.
    async fn hop(&self, from: &NodeAddr, to: &NodeAddr) -> Result<(), DirectCommunicatorError> {
        let (packet_loss, e2e_delay) = {
            let registry = self.registry.lock().await;

            if registry.unreachable.contains(from) || registry.unreachable.contains(to) {
                return Err(DirectCommunicatorError::Unreachable);
            }

            let link = (from.clone(), to.clone());
            let packet_loss = registry
                .packet_loss
                .get(&link)
                .copied()
                .unwrap_or(self.default_packet_loss);
            let e2e_delay = registry
                .e2e_delay
                .get(&link)
                .copied()
                .or(self.default_e2e_delay);

            (packet_loss, e2e_delay)
        };

        if let Some(distr) = e2e_delay {
            futures_timer::Delay::new(delay(&distr)).await;
        }

        if roll_for_failure(packet_loss) {
            return Err(DirectCommunicatorError::Timeout);
        }

        Ok(())
    }

    /// Delivers a request and its reply. `dispatch` looks up the receiver's
    /// handler and has it answer.
    async fn call<F, Fut>(
        self,
        from: NodeAddr,
        to: NodeAddr,
        dispatch: F,
    ) -> Result<Fut::Output, DirectCommunicatorError>
    where
        F: FnOnce(&Registry<V>) -> Option<Fut>,
        Fut: Future,
    {
        self.hop(&from, &to).await?;

        let request = {
            let registry = self.registry.lock().await;
            dispatch(&registry)
        };

        let reply = match request {
            Some(request) => request.await,
            None => return Err(DirectCommunicatorError::Other),
        };

        self.hop(&to, &from).await?;

        Ok(reply)
    }
}

#[derive(Debug, Error)]
pub enum DirectCommunicatorError {
    #[error("other")]
    Other,

    #[error("timeout")]
    Timeout,

    #[error("unreachable")]
    Unreachable,

    #[error("remote failure: {0}")]
    Remote(String),
}

/// A node's view of a [`DirectCommunicators`] set.
pub struct DirectCommunicator<V> {
    set: DirectCommunicators<V>,
    me: NodeAddr,
}

impl<V> Clone for DirectCommunicator<V> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
            me: self.me.clone(),
        }
    }
}

impl<V: Value> DirectCommunicator<V> {
    pub fn me(&self) -> &NodeAddr {
        &self.me
    }

    fn paxos<'a, T, F, Fut>(
        &self,
        receivers: &'a [NodeAddr],
        dispatch: F,
    ) -> Vec<(&'a NodeAddr, BoxFuture<'static, Result<T, DirectCommunicatorError>>)>
    where
        T: Send + 'static,
        F: Fn(&acceptor::RequestHandler<V>) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, crate::error::AcceptorError>> + Send + 'static,
    {
        receivers
            .iter()
            .map(|receiver| {
                let to = receiver.clone();
                let dispatch = dispatch.clone();

                let reply = self
                    .set
                    .clone()
                    .call(self.me.clone(), receiver.clone(), move |r| {
                        r.acceptors.get(&to).map(dispatch)
                    })
                    .map(|r| r.and_then(|r| r.map_err(|e| DirectCommunicatorError::Remote(e.to_string()))));

                (receiver, reply.boxed())
            })
            .collect()
    }

    fn replica<T, F>(
        &self,
        receiver: &NodeAddr,
        dispatch: F,
    ) -> BoxFuture<'static, Result<T, DirectCommunicatorError>>
    where
        T: Send + 'static,
        F: FnOnce(&rsm::RequestHandler) -> BoxFuture<'static, T> + Send + 'static,
    {
        let to = receiver.clone();

        self.set
            .clone()
            .call(self.me.clone(), receiver.clone(), move |r| {
                r.replicas.get(&to).map(dispatch)
            })
            .boxed()
    }
}

impl<V: Value> Communicator for DirectCommunicator<V> {
    type Value = V;

    type Error = DirectCommunicatorError;

    type SendPrepare = BoxFuture<'static, Result<PrepareReply<V>, DirectCommunicatorError>>;
    type SendAccept = BoxFuture<'static, Result<AcceptReply, DirectCommunicatorError>>;
    type SendDecide = BoxFuture<'static, Result<DecideReply, DirectCommunicatorError>>;

    fn send_prepare<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        n: ProposalNum,
    ) -> Vec<(&'a NodeAddr, Self::SendPrepare)> {
        self.paxos(receivers, move |h| h.handle_prepare(instance, n.clone()))
    }

    fn send_accept<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        n: ProposalNum,
        value: V,
    ) -> Vec<(&'a NodeAddr, Self::SendAccept)> {
        self.paxos(receivers, move |h| {
            h.handle_accept(instance, n.clone(), value.clone())
        })
    }

    fn send_decide<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        value: V,
    ) -> Vec<(&'a NodeAddr, Self::SendDecide)> {
        self.paxos(receivers, move |h| h.handle_decide(instance, value.clone()))
    }
}

impl<V: Value> ClientCommunicator for DirectCommunicator<V> {
    type Error = DirectCommunicatorError;

    fn send_client_invoke(
        &mut self,
        receiver: &NodeAddr,
        proc: ProcId,
        args: Vec<u8>,
    ) -> Reply<Vec<u8>, InvokeError, DirectCommunicatorError> {
        self.replica(receiver, move |h| h.handle_client_invoke(proc, args))
    }

    fn send_members(
        &mut self,
        receiver: &NodeAddr,
    ) -> BoxFuture<'static, Result<Members, DirectCommunicatorError>> {
        self.replica(receiver, |h| h.handle_members())
            .map(|r| r.and_then(|r| r.map_err(|e| DirectCommunicatorError::Remote(e.to_string()))))
            .boxed()
    }
}

impl ReplicaCommunicator for DirectCommunicator<View> {
    fn send_replicate(
        &mut self,
        receiver: &NodeAddr,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> Reply<(), ReplicateError, DirectCommunicatorError> {
        self.replica(receiver, move |h| h.handle_replicate(proc, vs, args))
    }

    fn send_transfer(
        &mut self,
        receiver: &NodeAddr,
        vid: ViewId,
        last: Viewstamp,
    ) -> Reply<TransferReply, TransferError, DirectCommunicatorError> {
        self.replica(receiver, move |h| h.handle_transfer(vid, last))
    }

    fn send_transfer_done(
        &mut self,
        receiver: &NodeAddr,
        vid: ViewId,
    ) -> Reply<(), TransferError, DirectCommunicatorError> {
        let me = self.me.clone();

        self.replica(receiver, move |h| h.handle_transfer_done(me, vid))
    }

    fn send_join(
        &mut self,
        receiver: &NodeAddr,
        last: Viewstamp,
    ) -> Reply<JoinReply, JoinError, DirectCommunicatorError> {
        let me = self.me.clone();

        self.replica(receiver, move |h| h.handle_join(me, last))
    }
}

fn roll_for_failure(rate: f32) -> bool {
    use rand::Rng;

    rate > 0.0 && rand::thread_rng().gen::<f32>() < rate
}

fn delay(distr: &rand_distr::Normal<f32>) -> Duration {
    use rand::distributions::Distribution;

    let delay_ms = distr.sample(&mut rand::thread_rng());
    let delay_ms = delay_ms as u64;

    Duration::from_millis(delay_ms)
}
