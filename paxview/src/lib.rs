//! Paxview replicates a state machine across a primary and its backups. The
//! set of replicas, the _view_, is agreed upon with single-decree Paxos, one
//! instance of Paxos per view.
//!
//! # Layers
//!
//! The crate is organized in three layers. Each layer calls down into the
//! layer below it and receives upcalls from it.
//!
//! 1. **Paxos** ([`acceptor`], [`proposer`])
//!
//!    A [`Proposer`] runs one instance of Paxos for a given set of nodes and a
//!    proposed value. Each node hosts an [`Acceptor`][acceptor::Acceptor]
//!    which durably records its promises and acceptances in an
//!    [`AcceptorLog`][log::AcceptorLog]. Once an instance is decided, the
//!    acceptor invokes a [`CommitListener`][acceptor::CommitListener].
//!
//! 2. **View agreement** ([`config`])
//!
//!    [`Config`] turns membership changes into Paxos runs. Instance `i`
//!    decides view `i`. Views are only ever proposed among the members of the
//!    latest view and the decided history is free of gaps.
//!
//! 3. **Replication** ([`rsm`])
//!
//!    A [`Replica`][rsm::Replica] learns of every newly committed view and
//!    enters a view change. Once primary and backups have synced, the primary
//!    accepts client operations again. Each operation is stamped with the
//!    next [`Viewstamp`], forwarded to all backups and only executed by the
//!    primary after every backup executed it as well.
//!
//! # Protocol
//!
//! Agreeing on a value for an instance takes three steps.
//!
//! 1. Prepare `(Instance, ProposalNum)`
//!
//!    The proposer picks a proposal number greater than any it has used or
//!    observed. Acceptors promise not to accept anything numbered lower and
//!    return the proposal they accepted last, if any. An acceptor which has
//!    already decided the instance instead returns the decided values so the
//!    proposer can catch up.
//!
//! 2. Accept `(Instance, ProposalNum, Value)`
//!
//!    With promises from a majority, the proposer asks the promising
//!    acceptors to accept the value of the highest numbered proposal reported
//!    to it, or its own value if none was reported.
//!
//! 3. Decide `(Instance, Value)`
//!
//!    With acceptances from a majority, the value is chosen. The proposer
//!    informs all nodes on a best effort basis.
//!
//! # Replication
//!
//! The primary of a view is the primary of the previous view if it remains a
//! member. Otherwise it is the lowest addressed member of the previous view
//! which is also a member of the new one. Consequently the new primary always
//! holds the results of all operations that were acknowledged to clients.
//!
//! During a view change backups download the primary's state unless they
//! already hold it. The primary resumes serving clients only once every backup
//! reported back.

//
// Lint configuration
#![warn(rust_2018_idioms)]
#![warn(clippy::wildcard_imports)]

pub mod acceptor;
pub mod client;
pub mod communicator;
pub mod config;
pub mod error;
pub mod executor;
pub mod fault;
pub mod log;
mod macros;
pub mod proposal;
pub mod proposer;
#[cfg(feature = "prototyping")]
pub mod prototyping;
pub mod retry;
pub mod rsm;
pub mod state_machine;
mod util;
pub mod view;

use std::fmt::Debug;

#[doc(inline)]
pub use acceptor::Acceptor;
#[doc(inline)]
pub use client::RsmClient;
#[doc(inline)]
pub use config::Config;
pub use proposal::Instance;
pub use proposal::ProposalNum;
#[doc(inline)]
pub use proposer::Proposer;
#[doc(inline)]
pub use rsm::builder as replica_builder;
pub use rsm::Replica;
pub use rsm::RequestHandler;
#[doc(inline)]
pub use state_machine::StateMachine;
pub use view::NodeAddr;
pub use view::View;
pub use view::Viewstamp;

/// A value Paxos can agree upon.
///
/// Values must be serializable because acceptors log them durably and
/// because they travel between nodes.
pub trait Value:
    'static + Clone + Debug + Eq + Send + Sync + Unpin + serde::Serialize + serde::de::DeserializeOwned
{
}

impl<T> Value for T where
    T: 'static
        + Clone
        + Debug
        + Eq
        + Send
        + Sync
        + Unpin
        + serde::Serialize
        + serde::de::DeserializeOwned
{
}

/// Identifies a procedure of a [`StateMachine`].
pub type ProcId = u32;
