//! The task owning a replica's view and viewstamp bookkeeping.
//!
//! Newly committed views arrive from the acceptor over an unbounded channel
//! and take precedence over requests. Since the acceptor informs its
//! listener before it answers whoever made it commit, a request that was
//! sent in response to a commit always observes that commit.

use std::collections::BTreeSet;

use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::stream::PollNext;
use futures::stream::StreamExt;

use crate::communicator::Members;
use crate::communicator::TransferReply;
use crate::error::ExecuteError;
use crate::error::InvokeError;
use crate::error::ReplicateError;
use crate::error::TransferError;
use crate::proposal::Instance;
use crate::state_machine::StateMachine;
use crate::view::NodeAddr;
use crate::view::View;
use crate::view::ViewId;
use crate::view::Viewstamp;
use crate::ProcId;

use super::msg::Request;
use super::msg::Response;
use super::ReplicaStatus;
use super::RequestAndResponseSender;

enum Input {
    Commit(ViewId, View),
    Request(RequestAndResponseSender),
    Closed,
}

pub(crate) struct Keeper<M: StateMachine> {
    me: NodeAddr,
    state_machine: M,

    vid: ViewId,
    view: View,
    previous: View,
    primary: Option<NodeAddr>,

    in_view_change: bool,
    in_sync: bool,
    vid_in_sync: ViewId,
    // backups of `vid_in_sync` that have yet to acknowledge their transfer
    pending: BTreeSet<NodeAddr>,

    last: Viewstamp,
    next: Viewstamp,

    sync_waiters: Vec<(ViewId, oneshot::Sender<bool>)>,
    view_waiters: Vec<(ViewId, oneshot::Sender<ViewId>)>,
}

impl<M: StateMachine> Keeper<M> {
    pub fn new(me: NodeAddr, state_machine: M) -> Self {
        Self {
            me,
            state_machine,

            vid: 0,
            view: View::empty(),
            previous: View::empty(),
            primary: None,

            in_view_change: true,
            in_sync: false,
            vid_in_sync: 0,
            pending: BTreeSet::new(),

            last: Viewstamp::default(),
            next: Viewstamp::default(),

            sync_waiters: Vec::new(),
            view_waiters: Vec::new(),
        }
    }

    pub async fn run(
        mut self,
        requests: mpsc::Receiver<RequestAndResponseSender>,
        commits: mpsc::UnboundedReceiver<(Instance, View)>,
    ) {
        let commits = commits.map(|(vid, view)| Input::Commit(vid, view));
        let requests = requests
            .map(Input::Request)
            .chain(futures::stream::once(futures::future::ready(Input::Closed)));

        let mut inputs =
            futures::stream::select_with_strategy(commits, requests, |_: &mut ()| PollNext::Left);

        while let Some(input) = inputs.next().await {
            match input {
                Input::Commit(vid, view) => self.commit_change(vid, view),
                Input::Request((Request::ShutDown, resp_sender)) => {
                    let _ = resp_sender.send(Response::ShutDown(Ok(())));
                    break;
                }
                Input::Request((req, resp_sender)) => {
                    let resp = self.handle_request(req);

                    let _ = resp_sender.send(resp);
                }
                Input::Closed => break,
            }
        }

        tracing::info!("Replica {} shutting down at {}.", self.me, self.last);
    }

    fn handle_request(&mut self, req: Request) -> Response {
        match req {
            Request::Status => Response::Status(Ok(self.status())),
            Request::Members => Response::Members(Ok(Members {
                vid: self.vid,
                view: self.view.clone(),
                primary: self.primary.clone(),
            })),

            Request::BeginInvoke => Response::BeginInvoke(self.begin_invoke()),
            Request::ExecutePrimary { vs, proc, args } => {
                Response::ExecutePrimary(self.execute_primary(vs, proc, &args))
            }
            Request::Replicate { proc, vs, args } => {
                Response::Replicate(self.replicate(proc, vs, &args))
            }

            Request::Transfer { vid, last } => Response::Transfer(self.transfer(vid, last)),
            Request::Install { vid, reply } => Response::Install(self.install(vid, reply)),
            Request::TransferDone { from, vid } => {
                Response::TransferDone(self.transfer_done(from, vid))
            }

            Request::BeginSync { vid } => Response::BeginSync(Ok(self.begin_sync(vid))),
            Request::AwaitSync { vid } => Response::AwaitSync(Ok(self.await_sync(vid))),
            Request::FinishSync { vid } => Response::FinishSync(Ok(self.finish_sync(vid))),
            Request::AwaitViewAfter { vid } => {
                let (s, r) = oneshot::channel();

                if self.vid > vid {
                    let _ = s.send(self.vid);
                } else {
                    self.view_waiters.push((vid, s));
                }

                Response::AwaitViewAfter(Ok(r))
            }

            Request::ShutDown => Response::ShutDown(Ok(())),
        }
    }

    fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            me: self.me.clone(),
            vid: self.vid,
            view: self.view.clone(),
            primary: self.primary.clone(),
            is_member: self.view.contains(&self.me),
            in_view_change: self.in_view_change,
            in_sync: self.in_sync,
            last_applied: self.last,
            next_expected: self.next,
        }
    }

    fn is_primary(&self) -> bool {
        self.primary.as_ref() == Some(&self.me)
    }

    /// Upcall for a newly committed view.
    fn commit_change(&mut self, vid: ViewId, view: View) {
        if vid <= self.vid {
            tracing::debug!("Replica {} ignores stale view {}.", self.me, vid);
            return;
        }

        self.previous = std::mem::replace(&mut self.view, view);
        self.vid = vid;

        // the new primary must have been part of the previous view so that
        // it holds every acknowledged operation
        let primary = match self.primary.take() {
            Some(p) if self.view.contains(&p) => Some(p),
            _ => self
                .previous
                .iter()
                .filter(|m| self.view.contains(m))
                .min()
                .or_else(|| self.view.lowest())
                .cloned(),
        };
        self.primary = primary;

        self.in_view_change = true;
        self.in_sync = false;
        self.pending.clear();

        tracing::info!(
            "Replica {} enters view {} {} with primary {:?}.",
            self.me,
            vid,
            self.view,
            self.primary.as_ref().map(NodeAddr::as_str)
        );

        for (_, waiter) in self.sync_waiters.drain(..) {
            let _ = waiter.send(false);
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.view_waiters)
            .into_iter()
            .partition(|(after, _)| vid > *after);
        self.view_waiters = waiting;

        for (_, waiter) in ready {
            let _ = waiter.send(vid);
        }
    }

    fn begin_invoke(&mut self) -> Result<(Viewstamp, Vec<NodeAddr>), InvokeError> {
        if self.in_view_change {
            return Err(InvokeError::Busy);
        }
        if !self.is_primary() {
            return Err(InvokeError::NotPrimary);
        }

        let backups = self
            .view
            .iter()
            .filter(|m| **m != self.me)
            .cloned()
            .collect();

        Ok((self.next, backups))
    }

    fn execute_primary(
        &mut self,
        vs: Viewstamp,
        proc: ProcId,
        args: &[u8],
    ) -> Result<Vec<u8>, InvokeError> {
        // a view change may have intervened while the operation was
        // replicated
        if self.in_view_change || !self.is_primary() || vs != self.next {
            tracing::info!(
                "Primary {} drops operation {} replicated in a past view.",
                self.me,
                vs
            );

            return Err(InvokeError::Busy);
        }

        Ok(self.execute(vs, proc, args)?)
    }

    fn replicate(&mut self, proc: ProcId, vs: Viewstamp, args: &[u8]) -> Result<(), ReplicateError> {
        if self.in_view_change {
            return Err(ReplicateError::InViewChange);
        }
        if self.is_primary() {
            return Err(ReplicateError::IsPrimary);
        }
        if vs != self.next {
            tracing::info!(
                "Backup {} expected operation {}, received {}.",
                self.me,
                self.next,
                vs
            );

            return Err(ReplicateError::OrderingViolation {
                expected: self.next,
                received: vs,
            });
        }

        // an execution error is the operation's outcome, the primary will
        // arrive at the same
        if let Err(e) = self.execute(vs, proc, args) {
            tracing::debug!("Backup {} executed {} with error: {}", self.me, vs, e);
        }

        Ok(())
    }

    /// Executes an operation stamped with the expected viewstamp and moves on
    /// to the next one, regardless of the outcome.
    fn execute(&mut self, vs: Viewstamp, proc: ProcId, args: &[u8]) -> Result<Vec<u8>, ExecuteError> {
        debug_assert_eq!(vs, self.next);

        let result = self.state_machine.execute(proc, args);

        tracing::debug!("Replica {} executed {} (procedure {}).", self.me, vs, proc);

        self.last = vs;
        self.next = vs.next();

        result
    }

    fn transfer(&self, vid: ViewId, last: Viewstamp) -> Result<TransferReply, TransferError> {
        if !self.is_primary() || !self.in_sync || self.vid_in_sync != vid || self.vid != vid {
            return Err(TransferError::Busy);
        }

        let state = if last == self.last {
            None
        } else {
            let state = self.state_machine.marshal_state().map_err(|e| {
                tracing::error!("Primary {} failed to marshal its state: {}", self.me, e);
                TransferError::Marshal(e)
            })?;

            Some(state)
        };

        tracing::debug!(
            "Primary {} transfers {} to a backup at {} ({}).",
            self.me,
            self.last,
            last,
            if state.is_some() { "snapshot" } else { "up to date" }
        );

        Ok(TransferReply {
            state,
            last: self.last,
        })
    }

    fn install(&mut self, vid: ViewId, reply: TransferReply) -> Result<(), TransferError> {
        if vid != self.vid {
            return Err(TransferError::Busy);
        }

        if let Some(state) = reply.state {
            if reply.last != self.last {
                self.state_machine
                    .unmarshal_state(&state)
                    .map_err(TransferError::Snapshot)?;

                tracing::info!(
                    "Replica {} installed snapshot at {}, was at {}.",
                    self.me,
                    reply.last,
                    self.last
                );
            }
        }

        self.last = reply.last;

        Ok(())
    }

    fn transfer_done(&mut self, from: NodeAddr, vid: ViewId) -> Result<(), TransferError> {
        if !self.in_sync || self.vid_in_sync != vid || self.vid != vid {
            return Err(TransferError::Busy);
        }

        if self.pending.remove(&from) {
            tracing::debug!("Backup {} is in sync with {} for view {}.", from, self.me, vid);
        }

        if self.pending.is_empty() {
            for (_, waiter) in self.sync_waiters.drain(..) {
                let _ = waiter.send(true);
            }
        }

        Ok(())
    }

    fn begin_sync(&mut self, vid: ViewId) -> bool {
        if vid != self.vid || !self.is_primary() {
            return false;
        }

        self.in_sync = true;
        self.vid_in_sync = vid;
        self.pending = self
            .view
            .iter()
            .filter(|m| **m != self.me)
            .cloned()
            .collect();

        tracing::info!(
            "Primary {} syncs view {} at {}, awaiting {} backups.",
            self.me,
            vid,
            self.last,
            self.pending.len()
        );

        true
    }

    fn await_sync(&mut self, vid: ViewId) -> oneshot::Receiver<bool> {
        let (s, r) = oneshot::channel();

        if vid != self.vid || !self.in_sync || self.vid_in_sync != vid {
            let _ = s.send(false);
        } else if self.pending.is_empty() {
            let _ = s.send(true);
        } else {
            self.sync_waiters.push((vid, s));
        }

        r
    }

    fn finish_sync(&mut self, vid: ViewId) -> bool {
        if vid != self.vid {
            return false;
        }

        self.in_view_change = false;
        self.in_sync = false;
        self.next = Viewstamp::first_of(vid);

        tracing::info!("Replica {} completed view change to {}.", self.me, vid);

        true
    }
}
