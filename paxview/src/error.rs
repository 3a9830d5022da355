use thiserror::Error;

use crate::fault::Checkpoint;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;
use crate::view::View;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The actor backing a handle has stopped.
#[derive(Clone, Copy, Debug, Error)]
#[error("node is shut down")]
pub struct ShutDown;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("invalid working directory")]
    InvalidWorkingDir(std::path::PathBuf, #[source] BoxError),

    #[error("I/O error")]
    IoError(#[from] IoError),

    #[error("failed to execute task")]
    Executor(#[source] BoxError),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct IoError(String, #[source] std::io::Error);

impl IoError {
    pub fn new(context: impl Into<String>, source: std::io::Error) -> Self {
        Self(context.into(), source)
    }

    pub(crate) fn invalid_data(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::new(
            context,
            std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        )
    }
}

/// An acceptor failed to answer a request.
#[derive(Debug, Error)]
pub enum AcceptorError {
    /// The state change could not be logged, it was not applied.
    #[error("I/O error")]
    IoError(#[from] IoError),

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for AcceptorError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

/// Phase of a Paxos run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Prepare,
    Accept,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Prepare => f.write_str("prepare"),
            Phase::Accept => f.write_str("accept"),
        }
    }
}

/// A run of Paxos did not decide the proposed instance.
#[derive(Debug, Error)]
pub enum RunError {
    /// Another run is in progress on this proposer.
    #[error("another run is in progress")]
    AlreadyRunning,

    /// An acceptor promised a greater proposal number. Retrying with a
    /// greater round may succeed.
    #[error("proposal was rejected in favor of {promised}")]
    RejectedProposal { promised: ProposalNum },

    /// The instance was decided already. The decided values were handed to
    /// the local acceptor, the instance must not be retried.
    #[error("instance {instance} was decided already")]
    StaleInstance { instance: Instance },

    #[error("{phase} phase reached {granted} of {needed} nodes")]
    QuorumUnreachable {
        phase: Phase,
        granted: usize,
        needed: usize,
    },

    #[error("crashed at {0:?}")]
    Crashed(Checkpoint),

    /// The local acceptor failed to log what it learned during the run.
    #[error("I/O error")]
    IoError(#[from] IoError),

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for RunError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

impl From<AcceptorError> for RunError {
    fn from(e: AcceptorError) -> Self {
        match e {
            AcceptorError::IoError(e) => Self::IoError(e),
            AcceptorError::ShutDown => Self::ShutDown,
        }
    }
}

/// Reported back by a [`StateMachine`][crate::StateMachine] that failed to
/// execute an operation.
///
/// Execution must be deterministic, every replica must fail alike.
#[derive(Clone, Debug, Eq, PartialEq, Error, serde::Deserialize, serde::Serialize)]
pub enum ExecuteError {
    #[error("unknown procedure `{0}`")]
    UnknownProc(ProcId),

    #[error("malformed arguments: {0}")]
    MalformedArgs(String),

    #[error("{0}")]
    Failed(String),
}

/// A client operation was not executed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum InvokeError {
    /// This node is not the primary of its current view.
    #[error("node is not primary")]
    NotPrimary,

    /// The view is changing or a backup failed to execute the operation.
    #[error("node is busy")]
    Busy,

    #[error("crashed at {0:?}")]
    Crashed(Checkpoint),

    /// The operation was executed and failed.
    #[error("execution failed")]
    Execution(#[from] ExecuteError),

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for InvokeError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

/// A backup refused to execute a replicated operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReplicateError {
    #[error("expected viewstamp {expected}, received {received}")]
    OrderingViolation {
        expected: Viewstamp,
        received: Viewstamp,
    },

    #[error("view change in progress")]
    InViewChange,

    #[error("node is primary")]
    IsPrimary,

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for ReplicateError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

/// State transfer failed. The recovery loop retries after backing off.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("primary is unreachable")]
    Unreachable,

    #[error("primary is busy")]
    Busy,

    #[error("primary failed to marshal its state")]
    Marshal(#[source] BoxError),

    #[error("snapshot could not be installed")]
    Snapshot(#[source] BoxError),

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for TransferError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    /// The contacted node is not primary or is changing views.
    #[error("contacted node is busy")]
    Busy,

    /// The primary failed to agree on a view including the joiner.
    #[error("admission was rejected")]
    Rejected,

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for JoinError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

/// A membership change could not be agreed upon.
#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("node has no view yet")]
    NoView,

    #[error("membership would not change")]
    Unchanged,

    /// A different view was decided for the instance.
    #[error("view {vid} was decided as {decided}")]
    Superseded { vid: ViewId, decided: View },

    #[error("agreement failed")]
    Run(#[from] RunError),

    #[error("node is shut down")]
    ShutDown,
}

impl From<ShutDown> for ChangeError {
    fn from(_: ShutDown) -> Self {
        Self::ShutDown
    }
}

/// An [`RsmClient`][crate::RsmClient] failed to have an operation executed.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The operation was executed and failed.
    #[error("execution failed")]
    Execution(#[source] ExecuteError),

    /// No primary could be found that accepted the operation before the
    /// client gave up.
    #[error("no primary accepted the operation")]
    Exhausted,
}
