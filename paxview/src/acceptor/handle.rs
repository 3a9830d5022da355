use std::future::Future;

use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::sink::SinkExt;

use crate::error::AcceptorError;
use crate::error::ShutDown;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;

use super::msg::Request;
use super::msg::Response;
use super::AcceptReply;
use super::AcceptorStatus;
use super::DecideReply;
use super::PrepareReply;
use super::RequestAndResponseSender;

/// Handle to an acceptor's task. The task shuts down once all handles are
/// dropped or when asked to.
#[derive(Debug)]
pub struct AcceptorHandle<V> {
    sender: mpsc::Sender<RequestAndResponseSender<V>>,
}

impl<V> Clone for AcceptorHandle<V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<V: Send + 'static> AcceptorHandle<V> {
    pub(super) fn new(sender: mpsc::Sender<RequestAndResponseSender<V>>) -> Self {
        Self { sender }
    }

    pub fn prepare(
        &self,
        instance: Instance,
        n: ProposalNum,
    ) -> impl Future<Output = Result<PrepareReply<V>, AcceptorError>> {
        crate::dispatch_req!(self, Prepare, { instance, n })
    }

    pub fn accept(
        &self,
        instance: Instance,
        n: ProposalNum,
        value: V,
    ) -> impl Future<Output = Result<AcceptReply, AcceptorError>> {
        crate::dispatch_req!(self, Accept, { instance, n, value })
    }

    pub fn decide(
        &self,
        instance: Instance,
        value: V,
    ) -> impl Future<Output = Result<DecideReply, AcceptorError>> {
        crate::dispatch_req!(self, Decide, { instance, value })
    }

    /// Commits the given decided values in order. Returns the highest decided
    /// instance afterwards.
    pub fn catch_up(
        &self,
        decided: Vec<(Instance, V)>,
    ) -> impl Future<Output = Result<Instance, AcceptorError>> {
        crate::dispatch_req!(self, CatchUp, { decided })
    }

    pub fn status(&self) -> impl Future<Output = Result<AcceptorStatus, ShutDown>> {
        crate::dispatch_req!(self, Status)
    }

    /// The highest decided instance and its value.
    pub fn latest(&self) -> impl Future<Output = Result<Option<(Instance, V)>, ShutDown>> {
        crate::dispatch_req!(self, Latest)
    }

    pub fn decided(
        &self,
        instance: Instance,
    ) -> impl Future<Output = Result<Option<V>, ShutDown>> {
        crate::dispatch_req!(self, Decided, { instance })
    }

    /// All decided values from instance `since` onwards.
    pub fn history(
        &self,
        since: Instance,
    ) -> impl Future<Output = Result<Vec<(Instance, V)>, ShutDown>> {
        crate::dispatch_req!(self, History, { since })
    }

    /// Stops the acceptor's task. Requests sent afterwards fail with
    /// [`ShutDown`].
    pub fn shut_down(&self) -> impl Future<Output = Result<(), ShutDown>> {
        crate::dispatch_req!(self, ShutDown)
    }
}
