//! The proposer role of Paxos.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;

use crate::acceptor::AcceptReply;
use crate::acceptor::AcceptorHandle;
use crate::acceptor::DecideReply;
use crate::acceptor::PrepareReply;
use crate::communicator::Communicator;
use crate::communicator::ValueOf;
use crate::error::Phase;
use crate::error::RunError;
use crate::fault::Checkpoint;
use crate::fault::Faults;
use crate::fault::NoFaults;
use crate::fault::Verdict;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::util::timeout;
use crate::view::majority_of;
use crate::view::NodeAddr;

/// Drives runs of Paxos, one at a time.
///
/// Besides the greatest round it has used, a proposer keeps no state across
/// runs. Clones share that round and the restriction to a single run.
pub struct Proposer<C: Communicator> {
    me: NodeAddr,
    acceptor: AcceptorHandle<ValueOf<C>>,
    communicator: C,
    faults: Arc<dyn Faults>,
    call_timeout: Duration,

    round: Arc<AtomicU64>,
    running: Arc<futures::lock::Mutex<()>>,
}

impl<C: Communicator> Clone for Proposer<C> {
    fn clone(&self) -> Self {
        Self {
            me: self.me.clone(),
            acceptor: self.acceptor.clone(),
            communicator: self.communicator.clone(),
            faults: Arc::clone(&self.faults),
            call_timeout: self.call_timeout,

            round: Arc::clone(&self.round),
            running: Arc::clone(&self.running),
        }
    }
}

impl<C: Communicator> Proposer<C> {
    /// Creates a proposer for node `me`, whose own acceptor is `acceptor`.
    pub fn new(me: NodeAddr, acceptor: AcceptorHandle<ValueOf<C>>, communicator: C) -> Self {
        Self {
            me,
            acceptor,
            communicator,
            faults: Arc::new(NoFaults),
            call_timeout: Duration::from_secs(1),

            round: Arc::new(AtomicU64::new(0)),
            running: Arc::new(futures::lock::Mutex::new(())),
        }
    }

    pub fn with_faults(mut self, faults: Arc<dyn Faults>) -> Self {
        self.faults = faults;
        self
    }

    /// Requests that aren't answered within `call_timeout` count as
    /// unanswered.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn me(&self) -> &NodeAddr {
        &self.me
    }

    pub fn acceptor(&self) -> &AcceptorHandle<ValueOf<C>> {
        &self.acceptor
    }

    /// Runs Paxos among `nodes` to decide `instance`, proposing `value`.
    ///
    /// Resolves to the decided value. It differs from `value` if a value was
    /// accepted for the instance before. Majorities are computed relative to
    /// `nodes`, regardless of how many of them respond.
    pub async fn run(
        &self,
        instance: Instance,
        nodes: &[NodeAddr],
        value: ValueOf<C>,
    ) -> Result<ValueOf<C>, RunError> {
        let _running = self.running.try_lock().ok_or(RunError::AlreadyRunning)?;

        let result = self.run_exclusively(instance, nodes, value).await;

        match &result {
            Ok(v) => tracing::info!("Node {} decided instance {}: {:?}", self.me, instance, v),
            Err(e) => tracing::info!("Node {} failed to decide instance {}: {}", self.me, instance, e),
        }

        result
    }

    async fn run_exclusively(
        &self,
        instance: Instance,
        nodes: &[NodeAddr],
        value: ValueOf<C>,
    ) -> Result<ValueOf<C>, RunError> {
        let status = self.acceptor.status().await?;

        if instance <= status.highest {
            return Err(RunError::StaleInstance { instance });
        }

        let round = self.round.load(Ordering::SeqCst).max(status.promised.round()) + 1;
        self.round.fetch_max(round, Ordering::SeqCst);
        let n = ProposalNum::new(round, self.me.clone());

        let needed = majority_of(nodes.len());

        let (promisers, chosen) = self.prepare(instance, nodes, n.clone(), needed).await?;
        let chosen = chosen.unwrap_or(value);

        self.checkpoint(Checkpoint::BeforeAccept)?;

        self.accept(instance, &promisers, n, chosen.clone(), needed)
            .await?;

        self.checkpoint(Checkpoint::BeforeDecide)?;

        self.decide(instance, nodes, chosen.clone()).await;

        Ok(chosen)
    }

    fn checkpoint(&self, checkpoint: Checkpoint) -> Result<(), RunError> {
        match self.faults.at(&self.me, checkpoint) {
            Verdict::Proceed => Ok(()),
            Verdict::Crash => Err(RunError::Crashed(checkpoint)),
        }
    }

    fn observe(&self, promised: &ProposalNum) {
        self.round.fetch_max(promised.round(), Ordering::SeqCst);
    }

    /// Returns the nodes that promised `n` and the value of the highest
    /// numbered proposal they reported as accepted.
    async fn prepare(
        &self,
        instance: Instance,
        nodes: &[NodeAddr],
        n: ProposalNum,
        needed: usize,
    ) -> Result<(Vec<NodeAddr>, Option<ValueOf<C>>), RunError> {
        let mut communicator = self.communicator.clone();
        let call_timeout = self.call_timeout;

        let mut pending = communicator
            .send_prepare(nodes, instance, n.clone())
            .into_iter()
            .map(|(node, reply)| timeout(call_timeout, reply).map(move |r| (node, r)))
            .collect::<FuturesUnordered<_>>();

        let mut promisers = Vec::new();
        let mut highest_accepted: Option<(ProposalNum, ValueOf<C>)> = None;
        let mut rejected_by: Option<ProposalNum> = None;

        while let Some((node, reply)) = pending.next().await {
            match reply {
                Ok(Ok(PrepareReply::Promise { accepted })) => {
                    promisers.push(node.clone());

                    if let Some((accepted_n, accepted_v)) = accepted {
                        if highest_accepted
                            .as_ref()
                            .map(|(h, _)| accepted_n > *h)
                            .unwrap_or(true)
                        {
                            highest_accepted = Some((accepted_n, accepted_v));
                        }
                    }
                }
                Ok(Ok(PrepareReply::Rejected { promised })) => {
                    tracing::debug!("Node {} rejected {}, promised {}.", node, n, promised);

                    self.observe(&promised);
                    if rejected_by.as_ref().map(|r| promised > *r).unwrap_or(true) {
                        rejected_by = Some(promised);
                    }
                }
                Ok(Ok(PrepareReply::Stale { decided })) => {
                    tracing::info!(
                        "Node {} reports instance {} as decided, catching up.",
                        node,
                        instance
                    );

                    self.acceptor.catch_up(decided).await?;

                    return Err(RunError::StaleInstance { instance });
                }
                Ok(Ok(PrepareReply::Behind { highest })) => {
                    tracing::debug!("Node {} is behind at instance {}.", node, highest);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Prepare to {} failed: {:?}", node, e);
                }
                Err(_) => {
                    tracing::debug!("Prepare to {} timed out.", node);
                }
            }
        }

        if promisers.len() < needed {
            return Err(match rejected_by {
                Some(promised) => RunError::RejectedProposal { promised },
                None => RunError::QuorumUnreachable {
                    phase: Phase::Prepare,
                    granted: promisers.len(),
                    needed,
                },
            });
        }

        Ok((promisers, highest_accepted.map(|(_, v)| v)))
    }

    async fn accept(
        &self,
        instance: Instance,
        promisers: &[NodeAddr],
        n: ProposalNum,
        value: ValueOf<C>,
        needed: usize,
    ) -> Result<(), RunError> {
        let mut communicator = self.communicator.clone();
        let call_timeout = self.call_timeout;

        let mut pending = communicator
            .send_accept(promisers, instance, n.clone(), value)
            .into_iter()
            .map(|(node, reply)| timeout(call_timeout, reply).map(move |r| (node, r)))
            .collect::<FuturesUnordered<_>>();

        let mut accepted = 0;
        let mut rejected_by: Option<ProposalNum> = None;
        let mut stale = false;

        while let Some((node, reply)) = pending.next().await {
            match reply {
                Ok(Ok(AcceptReply::Accepted)) => {
                    accepted += 1;
                }
                Ok(Ok(AcceptReply::Rejected { promised })) => {
                    tracing::debug!("Node {} refused {}, promised {}.", node, n, promised);

                    self.observe(&promised);
                    if rejected_by.as_ref().map(|r| promised > *r).unwrap_or(true) {
                        rejected_by = Some(promised);
                    }
                }
                Ok(Ok(AcceptReply::Stale { highest })) => {
                    tracing::debug!("Node {} decided up to instance {}.", node, highest);
                    stale = true;
                }
                Ok(Ok(AcceptReply::Behind { highest })) => {
                    tracing::debug!("Node {} is behind at instance {}.", node, highest);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Accept to {} failed: {:?}", node, e);
                }
                Err(_) => {
                    tracing::debug!("Accept to {} timed out.", node);
                }
            }
        }

        if accepted >= needed {
            Ok(())
        } else if let Some(promised) = rejected_by {
            Err(RunError::RejectedProposal { promised })
        } else if stale {
            Err(RunError::StaleInstance { instance })
        } else {
            Err(RunError::QuorumUnreachable {
                phase: Phase::Accept,
                granted: accepted,
                needed,
            })
        }
    }

    /// Informs `nodes` of the decision, best effort. Nodes that missed
    /// earlier decisions are sent those first.
    async fn decide(&self, instance: Instance, nodes: &[NodeAddr], value: ValueOf<C>) {
        let mut communicator = self.communicator.clone();
        let call_timeout = self.call_timeout;

        let replies = communicator
            .send_decide(nodes, instance, value.clone())
            .into_iter()
            .map(|(node, reply)| timeout(call_timeout, reply).map(move |r| (node, r)))
            .collect::<FuturesUnordered<_>>()
            .collect::<Vec<_>>()
            .await;

        for (node, reply) in replies {
            match reply {
                Ok(Ok(DecideReply::Behind { highest })) => {
                    self.replay_decisions(node, highest, instance, value.clone())
                        .await;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!("Decide to {} failed: {:?}", node, e);
                }
                Err(_) => {
                    tracing::debug!("Decide to {} timed out.", node);
                }
            }
        }
    }

    async fn replay_decisions(
        &self,
        node: &NodeAddr,
        highest: Instance,
        instance: Instance,
        value: ValueOf<C>,
    ) {
        let mut decided = match self.acceptor.history(highest + 1).await {
            Ok(history) => history,
            Err(_) => return,
        };
        decided.retain(|(i, _)| *i < instance);
        decided.push((instance, value));

        tracing::info!(
            "Catching up {} from instance {} to {}.",
            node,
            highest,
            instance
        );

        let mut communicator = self.communicator.clone();
        let mut expected = highest + 1;

        for (i, v) in decided {
            if i != expected {
                tracing::warn!("Can't catch up {} past instance {}.", node, expected - 1);
                return;
            }

            let reply = communicator
                .send_decide(std::slice::from_ref(node), i, v)
                .into_iter()
                .next()
                .map(|(_, reply)| timeout(self.call_timeout, reply));

            match reply {
                Some(reply) => match reply.await {
                    Ok(Ok(DecideReply::Committed)) | Ok(Ok(DecideReply::AlreadyCommitted)) => {}
                    _ => return,
                },
                None => return,
            }

            expected += 1;
        }
    }
}
