use std::future::Future;

use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::sink::SinkExt;

use crate::communicator::Members;
use crate::communicator::TransferReply;
use crate::error::InvokeError;
use crate::error::ReplicateError;
use crate::error::ShutDown;
use crate::error::TransferError;
use crate::view::NodeAddr;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;

use super::msg::Request;
use super::msg::Response;
use super::ReplicaStatus;
use super::RequestAndResponseSender;

/// Handle to the task that owns a replica's view and viewstamp bookkeeping
/// along with its state machine.
#[derive(Clone, Debug)]
pub(crate) struct KeeperHandle {
    sender: mpsc::Sender<RequestAndResponseSender>,
}

impl KeeperHandle {
    pub(super) fn new(sender: mpsc::Sender<RequestAndResponseSender>) -> Self {
        Self { sender }
    }

    pub fn status(&self) -> impl Future<Output = Result<ReplicaStatus, ShutDown>> {
        crate::dispatch_req!(self, Status)
    }

    pub fn members(&self) -> impl Future<Output = Result<Members, ShutDown>> {
        crate::dispatch_req!(self, Members)
    }

    /// Reserves the next viewstamp. Resolves to it and the backups it must be
    /// replicated to.
    pub fn begin_invoke(
        &self,
    ) -> impl Future<Output = Result<(Viewstamp, Vec<NodeAddr>), InvokeError>> {
        crate::dispatch_req!(self, BeginInvoke)
    }

    pub fn execute_primary(
        &self,
        vs: Viewstamp,
        proc: ProcId,
        args: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, InvokeError>> {
        crate::dispatch_req!(self, ExecutePrimary, { vs, proc, args })
    }

    pub fn replicate(
        &self,
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    ) -> impl Future<Output = Result<(), ReplicateError>> {
        crate::dispatch_req!(self, Replicate, { proc, vs, args })
    }

    pub fn transfer(
        &self,
        vid: ViewId,
        last: Viewstamp,
    ) -> impl Future<Output = Result<TransferReply, TransferError>> {
        crate::dispatch_req!(self, Transfer, { vid, last })
    }

    pub fn install(
        &self,
        vid: ViewId,
        reply: TransferReply,
    ) -> impl Future<Output = Result<(), TransferError>> {
        crate::dispatch_req!(self, Install, { vid, reply })
    }

    pub fn transfer_done(
        &self,
        from: NodeAddr,
        vid: ViewId,
    ) -> impl Future<Output = Result<(), TransferError>> {
        crate::dispatch_req!(self, TransferDone, { from, vid })
    }

    /// Starts collecting transfer acknowledgements for view `vid`. Resolves
    /// to `false` if `vid` is no longer current.
    pub fn begin_sync(&self, vid: ViewId) -> impl Future<Output = Result<bool, ShutDown>> {
        crate::dispatch_req!(self, BeginSync, { vid })
    }

    /// Resolves once all backups of view `vid` acknowledged their transfer,
    /// with `false` if the view changed first.
    pub async fn await_sync(&self, vid: ViewId) -> Result<bool, ShutDown> {
        let done = self.sync_waiter(vid).await?;

        Ok(done.await.unwrap_or(false))
    }

    fn sync_waiter(
        &self,
        vid: ViewId,
    ) -> impl Future<Output = Result<oneshot::Receiver<bool>, ShutDown>> {
        crate::dispatch_req!(self, AwaitSync, { vid })
    }

    /// Leaves the view change for view `vid`. Resolves to `false` if `vid`
    /// is no longer current.
    pub fn finish_sync(&self, vid: ViewId) -> impl Future<Output = Result<bool, ShutDown>> {
        crate::dispatch_req!(self, FinishSync, { vid })
    }

    /// Resolves to the id of the first view committed after `vid`.
    pub async fn await_view_after(&self, vid: ViewId) -> Result<ViewId, ShutDown> {
        let next = self.view_waiter(vid).await?;

        next.await.map_err(|_| ShutDown)
    }

    fn view_waiter(
        &self,
        vid: ViewId,
    ) -> impl Future<Output = Result<oneshot::Receiver<ViewId>, ShutDown>> {
        crate::dispatch_req!(self, AwaitViewAfter, { vid })
    }

    pub fn shut_down(&self) -> impl Future<Output = Result<(), ShutDown>> {
        crate::dispatch_req!(self, ShutDown)
    }
}
