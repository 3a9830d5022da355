use crate::error::AcceptorError;
use crate::error::ShutDown;
use crate::proposal::Instance;
use crate::proposal::ProposalNum;

use super::AcceptReply;
use super::AcceptorStatus;
use super::DecideReply;
use super::PrepareReply;

#[derive(Debug)]
pub enum Request<V> {
    Prepare {
        instance: Instance,
        n: ProposalNum,
    },
    Accept {
        instance: Instance,
        n: ProposalNum,
        value: V,
    },
    Decide {
        instance: Instance,
        value: V,
    },

    CatchUp {
        decided: Vec<(Instance, V)>,
    },

    Status,
    Latest,
    Decided {
        instance: Instance,
    },
    History {
        since: Instance,
    },

    ShutDown,
}

#[derive(Debug)]
pub enum Response<V> {
    Prepare(Result<PrepareReply<V>, AcceptorError>),
    Accept(Result<AcceptReply, AcceptorError>),
    Decide(Result<DecideReply, AcceptorError>),

    CatchUp(Result<Instance, AcceptorError>),

    Status(Result<AcceptorStatus, ShutDown>),
    Latest(Result<Option<(Instance, V)>, ShutDown>),
    Decided(Result<Option<V>, ShutDown>),
    History(Result<Vec<(Instance, V)>, ShutDown>),

    ShutDown(Result<(), ShutDown>),
}
