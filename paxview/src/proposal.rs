//! Defines [`ProposalNum`] and [`Instance`].

use serde::Deserialize;
use serde::Serialize;

use crate::view::NodeAddr;

/// Identifies one run of Paxos, i.e. the agreement on one value.
///
/// Instance `i` agrees on view `i`. Instances are decided strictly in order.
pub type Instance = u64;

/// A proposal number.
///
/// Proposal numbers are totally ordered. The greater round wins, ties are
/// broken by comparing the proposers' addresses. Because every proposer tags
/// its proposals with its own address, no two proposers ever use the same
/// proposal number.
#[derive(
    Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
pub struct ProposalNum {
    // field order matters for the derived `Ord`
    round: u64,
    proposer: NodeAddr,
}

impl ProposalNum {
    pub fn new(round: u64, proposer: NodeAddr) -> Self {
        Self { round, proposer }
    }

    /// The proposal number every acceptor starts out with for an instance.
    ///
    /// It is less than any proposal number with a non-zero round.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn proposer(&self) -> &NodeAddr {
        &self.proposer
    }

    pub fn is_zero(&self) -> bool {
        self.round == 0
    }
}

impl std::fmt::Display for ProposalNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.round, self.proposer)
    }
}
