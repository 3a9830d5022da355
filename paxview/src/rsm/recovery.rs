//! The recovery loop drives a replica through joins and view changes.
//!
//! It runs for as long as the replica does. Each iteration looks at the
//! replica's status and takes the one step that status calls for:
//!
//! - not a member: join the view through the configured contact,
//! - changing views as primary: wait for every backup to sync,
//! - changing views as backup: pull the primary's state and report back,
//! - otherwise: wait for the next view.

use crate::communicator::ReplicaCommunicator;
use crate::communicator::TransferReply;
use crate::error::ShutDown;
use crate::error::TransferError;
use crate::retry::RetrySettings;
use crate::util::timeout;
use crate::view::NodeAddr;
use crate::view::ViewId;

use super::Replica;
use super::ReplicaStatus;

pub(super) struct Recovery<C: ReplicaCommunicator> {
    replica: Replica<C>,
    contact: Option<NodeAddr>,
    retry: RetrySettings,
}

impl<C: ReplicaCommunicator> Recovery<C> {
    pub fn new(replica: Replica<C>, contact: Option<NodeAddr>, retry: RetrySettings) -> Self {
        Self {
            replica,
            contact,
            retry,
        }
    }

    pub async fn run(self) {
        while self.step().await.is_ok() {}

        tracing::info!("Recovery of {} stops.", self.replica.me);
    }

    async fn step(&self) -> Result<(), ShutDown> {
        let status = self.replica.keeper.status().await?;

        if !status.is_member {
            match &self.contact {
                Some(contact) => {
                    self.join(contact, &status).await?;
                }
                None => {
                    self.replica.keeper.await_view_after(status.vid).await?;
                }
            }
        } else if status.in_view_change {
            let synced = if status.is_primary() {
                self.sync_backups(status.vid).await?
            } else {
                match &status.primary {
                    Some(primary) => self.sync_with(primary, status.vid).await?,
                    None => false,
                }
            };

            if synced {
                self.replica.keeper.finish_sync(status.vid).await?;
            } else {
                tracing::info!(
                    "Replica {} abandons sync for view {}.",
                    self.replica.me,
                    status.vid
                );
            }
        } else {
            self.replica.keeper.await_view_after(status.vid).await?;
        }

        Ok(())
    }

    /// Asks the primary behind `contact` to admit this replica, retrying
    /// until it does or the replica became a member some other way.
    async fn join(&self, contact: &NodeAddr, status: &ReplicaStatus) -> Result<(), ShutDown> {
        let me = &self.replica.me;
        let timeouts = self.replica.timeouts;
        let mut communicator = self.replica.communicator.clone();
        let mut retry = self.retry.backoff();

        loop {
            let primary = match timeout(timeouts.call, communicator.send_members(contact)).await {
                Ok(Ok(members)) => members.primary.unwrap_or_else(|| contact.clone()),
                _ => contact.clone(),
            };

            tracing::info!("Replica {} asks {} to join.", me, primary);

            let reply = communicator.send_join(&primary, status.last_applied);

            match timeout(timeouts.join, reply).await {
                Ok(Ok(Ok(reply))) => match self.replica.config.restore(reply.history).await {
                    Ok(vid) => {
                        tracing::info!("Replica {} joined, latest view is {}.", me, vid);

                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!("Replica {} failed to restore views: {}", me, e);
                    }
                },
                Ok(Ok(Err(e))) => {
                    tracing::info!("Node {} refused to admit {}: {}", primary, me, e);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Join request to {} failed: {:?}", primary, e);
                }
                Err(_) => {
                    tracing::debug!("Join request to {} timed out.", primary);
                }
            }

            if self.replica.keeper.status().await?.is_member || !retry.pause().await {
                return Ok(());
            }
        }
    }

    /// Waits until every backup of view `vid` has synced. Resolves to `false`
    /// if the view changed in the meantime.
    async fn sync_backups(&self, vid: ViewId) -> Result<bool, ShutDown> {
        // let an operation in flight settle, view changes make later ones
        // fail
        drop(self.replica.invoking.lock().await);

        if !self.replica.keeper.begin_sync(vid).await? {
            return Ok(false);
        }

        self.replica.keeper.await_sync(vid).await
    }

    /// Brings this backup in line with `primary` for view `vid`.
    async fn sync_with(&self, primary: &NodeAddr, vid: ViewId) -> Result<bool, ShutDown> {
        let me = &self.replica.me;
        let call_timeout = self.replica.timeouts.call;
        let mut communicator = self.replica.communicator.clone();
        let mut retry = self.retry.backoff();

        loop {
            match self.transfer_from(primary, vid).await {
                Ok(()) => {
                    let done = communicator.send_transfer_done(primary, vid);

                    match timeout(call_timeout, done).await {
                        Ok(Ok(Ok(()))) => {
                            tracing::info!("Replica {} synced with {} for view {}.", me, primary, vid);

                            return Ok(true);
                        }
                        Ok(Ok(Err(e))) => {
                            tracing::debug!("Primary {} refused transfer report: {}", primary, e);
                        }
                        _ => {
                            tracing::debug!("Transfer report to {} failed.", primary);
                        }
                    }
                }
                Err(TransferError::ShutDown) => return Err(ShutDown),
                Err(e) => {
                    tracing::debug!("Transfer from {} to {} failed: {}", primary, me, e);
                }
            }

            if self.replica.keeper.status().await?.vid != vid || !retry.pause().await {
                return Ok(false);
            }
        }
    }

    async fn transfer_from(&self, primary: &NodeAddr, vid: ViewId) -> Result<(), TransferError> {
        let last = self.replica.keeper.status().await?.last_applied;

        let mut communicator = self.replica.communicator.clone();
        let reply = communicator.send_transfer(primary, vid, last);

        let reply: TransferReply = match timeout(self.replica.timeouts.call, reply).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(e)) => {
                tracing::debug!("Transfer request to {} failed: {:?}", primary, e);

                return Err(TransferError::Unreachable);
            }
            Err(_) => return Err(TransferError::Unreachable),
        };

        self.replica.keeper.install(vid, reply).await
    }
}
