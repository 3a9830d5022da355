//! Submitting operations to a replicated state machine.

use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;

use crate::communicator::ClientCommunicator;
use crate::communicator::Members;
use crate::error::ClientError;
use crate::error::InvokeError;
use crate::retry::RetrySettings;
use crate::util::timeout;
use crate::view::NodeAddr;
use crate::ProcId;

/// Sends operations to the primary, wherever it currently is.
///
/// The client remembers the members and the primary it learned of last. If
/// the believed primary refuses an operation or does not answer, the client
/// asks all members it knows of for their view, adopts the most recent one
/// and tries again after backing off.
pub struct RsmClient<C: ClientCommunicator> {
    communicator: C,
    members: Vec<NodeAddr>,
    primary: Option<NodeAddr>,
    call_timeout: Duration,
    retry: RetrySettings,
}

impl<C: ClientCommunicator> RsmClient<C> {
    pub fn new(communicator: C, members: impl IntoIterator<Item = NodeAddr>) -> Self {
        Self {
            communicator,
            members: members.into_iter().collect(),
            primary: None,
            call_timeout: Duration::from_secs(5),
            retry: RetrySettings::default().giving_up_after(Duration::from_secs(30)),
        }
    }

    /// Requests that aren't answered within `call_timeout` are retried.
    ///
    /// Must exceed the time the primary takes to replicate an operation.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn members(&self) -> &[NodeAddr] {
        &self.members
    }

    pub fn primary(&self) -> Option<&NodeAddr> {
        self.primary.as_ref()
    }

    /// Has the primary execute `proc`.
    ///
    /// Operations may be executed more than once if a primary fails after
    /// replicating them.
    pub async fn invoke(&mut self, proc: ProcId, args: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let mut retry = self.retry.backoff();

        loop {
            if self.primary.is_none() {
                self.refresh().await;
            }

            if let Some(primary) = self.primary.clone() {
                let reply = self
                    .communicator
                    .send_client_invoke(&primary, proc, args.clone());

                match timeout(self.call_timeout, reply).await {
                    Ok(Ok(Ok(reply))) => return Ok(reply),
                    Ok(Ok(Err(InvokeError::Execution(e)))) => {
                        return Err(ClientError::Execution(e))
                    }
                    Ok(Ok(Err(e))) => {
                        tracing::debug!("Primary {} refused operation: {}", primary, e);

                        self.primary = None;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!("Operation to {} failed: {:?}", primary, e);

                        self.primary = None;
                    }
                    Err(_) => {
                        tracing::debug!("Operation to {} timed out.", primary);

                        self.primary = None;
                    }
                }
            }

            if !retry.pause().await {
                return Err(ClientError::Exhausted);
            }
        }
    }

    /// Adopts the most recent view reported by any known member.
    pub async fn refresh(&mut self) {
        let call_timeout = self.call_timeout;
        let mut communicator = self.communicator.clone();

        let latest = self
            .members
            .iter()
            .map(|m| timeout(call_timeout, communicator.send_members(m)))
            .collect::<FuturesUnordered<_>>()
            .filter_map(|r| async move { r.ok().and_then(Result::ok) })
            .fold(None, |latest: Option<Members>, m| async move {
                match latest {
                    Some(l) if l.vid >= m.vid => Some(l),
                    _ => Some(m),
                }
            })
            .await;

        match latest {
            Some(latest) => {
                tracing::debug!(
                    "Client adopts view {} {} with primary {:?}.",
                    latest.vid,
                    latest.view,
                    latest.primary
                );

                // keep asking nodes of older views, they may have been
                // readmitted since
                for m in latest.view.iter() {
                    if !self.members.contains(m) {
                        self.members.push(m.clone());
                    }
                }
                self.primary = latest.primary;
            }
            None => {
                tracing::debug!("No member answered.");
            }
        }
    }
}
