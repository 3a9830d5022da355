use futures::channel::oneshot;

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

use super::ReplicaStatus;

#[derive(Debug)]
pub enum Request {
    Status,
    Members,

    BeginInvoke,
    ExecutePrimary {
        vs: Viewstamp,
        proc: ProcId,
        args: Vec<u8>,
    },
    Replicate {
        proc: ProcId,
        vs: Viewstamp,
        args: Vec<u8>,
    },

    Transfer {
        vid: ViewId,
        last: Viewstamp,
    },
    Install {
        vid: ViewId,
        reply: TransferReply,
    },
    TransferDone {
        from: NodeAddr,
        vid: ViewId,
    },

    BeginSync {
        vid: ViewId,
    },
    AwaitSync {
        vid: ViewId,
    },
    FinishSync {
        vid: ViewId,
    },
    AwaitViewAfter {
        vid: ViewId,
    },

    ShutDown,
}

#[derive(Debug)]
pub enum Response {
    Status(Result<ReplicaStatus, ShutDown>),
    Members(Result<Members, ShutDown>),

    BeginInvoke(Result<(Viewstamp, Vec<NodeAddr>), InvokeError>),
    ExecutePrimary(Result<Vec<u8>, InvokeError>),
    Replicate(Result<(), ReplicateError>),

    Transfer(Result<TransferReply, TransferError>),
    Install(Result<(), TransferError>),
    TransferDone(Result<(), TransferError>),

    BeginSync(Result<bool, ShutDown>),
    AwaitSync(Result<oneshot::Receiver<bool>, ShutDown>),
    FinishSync(Result<bool, ShutDown>),
    AwaitViewAfter(Result<oneshot::Receiver<ViewId>, ShutDown>),

    ShutDown(Result<(), ShutDown>),
}
