use std::future::Future;

use crate::error::AcceptorError;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;

use super::AcceptReply;
use super::AcceptorHandle;
use super::DecideReply;
use super::PrepareReply;

/// Used by [`Communicator`][crate::communicator::Communicator]s to answer
/// Paxos requests sent by other nodes.
#[derive(Debug)]
pub struct RequestHandler<V>(AcceptorHandle<V>);

impl<V> Clone for RequestHandler<V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<V: Send + 'static> RequestHandler<V> {
    pub fn new(acceptor: AcceptorHandle<V>) -> Self {
        Self(acceptor)
    }

    /// Asks this node to answer a `send_prepare` sent by another node.
    pub fn handle_prepare(
        &self,
        instance: Instance,
        n: ProposalNum,
    ) -> impl Future<Output = Result<PrepareReply<V>, AcceptorError>> {
        self.0.prepare(instance, n)
    }

    /// Asks this node to answer a `send_accept` sent by another node.
    pub fn handle_accept(
        &self,
        instance: Instance,
        n: ProposalNum,
        value: V,
    ) -> impl Future<Output = Result<AcceptReply, AcceptorError>> {
        self.0.accept(instance, n, value)
    }

    /// Asks this node to answer a `send_decide` sent by another node.
    pub fn handle_decide(
        &self,
        instance: Instance,
        value: V,
    ) -> impl Future<Output = Result<DecideReply, AcceptorError>> {
        self.0.decide(instance, value)
    }
}
