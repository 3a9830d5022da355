use std::sync::Arc;

use futures::future::BoxFuture;
use futures::future::FutureExt;

use crate::communicator::JoinReply;
use crate::communicator::Members;
use crate::communicator::ReplicaCommunicator;
use crate::communicator::TransferReply;
use crate::error::InvokeError;
use crate::error::JoinError;
use crate::error::ReplicateError;
use crate::error::ShutDown;
use crate::error::TransferError;
use crate::view::NodeAddr;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;

use super::Replica;

/// Used by transports to answer replication and client requests sent to a
/// replica.
///
/// The replica's communicator type is erased so that transports can hold
/// handlers of replicas that communicate through the transport itself.
#[derive(Clone)]
pub struct RequestHandler(Arc<dyn Endpoint>);

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RequestHandler").field(self.0.me()).finish()
    }
}

impl RequestHandler {
    pub(super) fn new<C: ReplicaCommunicator>(replica: Replica<C>) -> Self {
        Self(Arc::new(replica))
    }

    /// Answers a `send_replicate` sent by the primary.
    pub fn handle_replicate(
        &self,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), ReplicateError>> {
        self.0.replicate(proc, vs, args)
    }

    /// Answers a `send_transfer` sent by a backup.
    pub fn handle_transfer(
        &self,
        vid: ViewId,
        last: Viewstamp,
    ) -> BoxFuture<'static, Result<TransferReply, TransferError>> {
        self.0.transfer(vid, last)
    }

    /// Answers a `send_transfer_done` sent by backup `from`.
    pub fn handle_transfer_done(
        &self,
        from: NodeAddr,
        vid: ViewId,
    ) -> BoxFuture<'static, Result<(), TransferError>> {
        self.0.transfer_done(from, vid)
    }

    /// Answers a `send_join` sent by `from`.
    pub fn handle_join(
        &self,
        from: NodeAddr,
        last: Viewstamp,
    ) -> BoxFuture<'static, Result<JoinReply, JoinError>> {
        self.0.join(from, last)
    }

    /// Answers a `send_client_invoke`.
    pub fn handle_client_invoke(
        &self,
        proc: ProcId,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, InvokeError>> {
        self.0.client_invoke(proc, args)
    }

    /// Answers a `send_members`.
    pub fn handle_members(&self) -> BoxFuture<'static, Result<Members, ShutDown>> {
        self.0.members()
    }
}

trait Endpoint: Send + Sync + 'static {
    fn me(&self) -> &NodeAddr;

    fn replicate(
        &self,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), ReplicateError>>;

    fn transfer(
        &self,
        vid: ViewId,
        last: Viewstamp,
    ) -> BoxFuture<'static, Result<TransferReply, TransferError>>;

    fn transfer_done(
        &self,
        from: NodeAddr,
        vid: ViewId,
    ) -> BoxFuture<'static, Result<(), TransferError>>;

    fn join(&self, from: NodeAddr, last: Viewstamp) -> BoxFuture<'static, Result<JoinReply, JoinError>>;

    fn client_invoke(
        &self,
        proc: ProcId,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, InvokeError>>;

    fn members(&self) -> BoxFuture<'static, Result<Members, ShutDown>>;
}

impl<C: ReplicaCommunicator> Endpoint for Replica<C> {
    fn me(&self) -> &NodeAddr {
        &self.me
    }

    fn replicate(
        &self,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<(), ReplicateError>> {
        self.keeper.replicate(proc, vs, args).boxed()
    }

    fn transfer(
        &self,
        vid: ViewId,
        last: Viewstamp,
    ) -> BoxFuture<'static, Result<TransferReply, TransferError>> {
        self.keeper.transfer(vid, last).boxed()
    }

    fn transfer_done(
        &self,
        from: NodeAddr,
        vid: ViewId,
    ) -> BoxFuture<'static, Result<(), TransferError>> {
        self.keeper.transfer_done(from, vid).boxed()
    }

    fn join(&self, from: NodeAddr, last: Viewstamp) -> BoxFuture<'static, Result<JoinReply, JoinError>> {
        let this = self.clone();

        async move { this.admit(from, last).await }.boxed()
    }

    fn client_invoke(
        &self,
        proc: ProcId,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>, InvokeError>> {
        let this = self.clone();

        async move { this.invoke(proc, args).await }.boxed()
    }

    fn members(&self) -> BoxFuture<'static, Result<Members, ShutDown>> {
        self.keeper.members().boxed()
    }
}
