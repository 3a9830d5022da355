//! Transport abstractions.
//!
//! A node talks to other nodes exclusively through these traits. Failures of
//! the transport are reported as `Self::Error` and treated as non-responses,
//! never as protocol errors. Refusals by the remote node are part of the
//! successful reply.

use std::future::Future;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::Serialize;

use crate::acceptor::AcceptReply;
use crate::acceptor::DecideReply;
use crate::acceptor::PrepareReply;
use crate::error::InvokeError;
use crate::error::JoinError;
use crate::error::ReplicateError;
use crate::error::TransferError;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::view::NodeAddr;
use crate::view::View;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;
use crate::Value;

pub type ValueOf<C> = <C as Communicator>::Value;

/// Sends Paxos requests.
pub trait Communicator: Clone + Send + Sync + 'static {
    type Value: Value;

    type Error: std::fmt::Debug + Send + Sync + 'static;

    type SendPrepare: Future<Output = Result<PrepareReply<Self::Value>, Self::Error>> + Send;
    type SendAccept: Future<Output = Result<AcceptReply, Self::Error>> + Send;
    type SendDecide: Future<Output = Result<DecideReply, Self::Error>> + Send;

    fn send_prepare<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        n: ProposalNum,
    ) -> Vec<(&'a NodeAddr, Self::SendPrepare)>;

    fn send_accept<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        n: ProposalNum,
        value: Self::Value,
    ) -> Vec<(&'a NodeAddr, Self::SendAccept)>;

    fn send_decide<'a>(
        &mut self,
        receivers: &'a [NodeAddr],
        instance: Instance,
        value: Self::Value,
    ) -> Vec<(&'a NodeAddr, Self::SendDecide)>;
}

/// Reply to a transport request: the transport may fail, the remote node may
/// refuse.
pub type Reply<T, E, F> = BoxFuture<'static, Result<Result<T, E>, F>>;

/// Primary's state as shipped to a backup.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct TransferReply {
    /// Marshalled state, omitted if the requester was up to date.
    pub state: Option<Vec<u8>>,
    /// Viewstamp of the last operation reflected by the state.
    pub last: Viewstamp,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct JoinReply {
    /// All decided views, oldest first.
    pub history: Vec<(ViewId, View)>,
}

/// A node's current view and primary.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Members {
    pub vid: ViewId,
    pub view: View,
    pub primary: Option<NodeAddr>,
}

/// Sends client requests to replicas.
pub trait ClientCommunicator: Clone + Send + Sync + 'static {
    type Error: std::fmt::Debug + Send + Sync + 'static;

    /// `rsmClient.invoke`
    fn send_client_invoke(
        &mut self,
        receiver: &NodeAddr,
        proc: ProcId,
        args: Vec<u8>,
    ) -> Reply<Vec<u8>, InvokeError, Self::Error>;

    /// `rsmClient.members`
    fn send_members(
        &mut self,
        receiver: &NodeAddr,
    ) -> BoxFuture<'static, Result<Members, Self::Error>>;
}

/// Sends requests between replicas.
pub trait ReplicaCommunicator: Communicator<Value = View> + ClientCommunicator {
    /// `rsm.invoke`, relays an operation from the primary to a backup.
    fn send_replicate(
        &mut self,
        receiver: &NodeAddr,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> Reply<(), ReplicateError, <Self as Communicator>::Error>;

    /// `rsm.transfer`
    fn send_transfer(
        &mut self,
        receiver: &NodeAddr,
        vid: ViewId,
        last: Viewstamp,
    ) -> Reply<TransferReply, TransferError, <Self as Communicator>::Error>;

    /// `rsm.transferDone`
    fn send_transfer_done(
        &mut self,
        receiver: &NodeAddr,
        vid: ViewId,
    ) -> Reply<(), TransferError, <Self as Communicator>::Error>;

    /// `rsm.join`
    fn send_join(
        &mut self,
        receiver: &NodeAddr,
        last: Viewstamp,
    ) -> Reply<JoinReply, JoinError, <Self as Communicator>::Error>;
}
