//! Agreement on views.
//!
//! Paxos instance `i` decides view `i`. A new view is only ever proposed for
//! the instance following the latest view this node knows of, and only among
//! the members of that view.

use crate::acceptor::AcceptorHandle;
use crate::communicator::Communicator;
use crate::error::AcceptorError;
use crate::error::ChangeError;
use crate::error::ShutDown;
use crate::proposal::Instance;
use crate::proposer::Proposer;
use crate::view::NodeAddr;
use crate::view::View;
use crate::view::ViewId;

pub struct Config<C: Communicator<Value = View>> {
    proposer: Proposer<C>,
}

impl<C: Communicator<Value = View>> Clone for Config<C> {
    fn clone(&self) -> Self {
        Self {
            proposer: self.proposer.clone(),
        }
    }
}

impl<C: Communicator<Value = View>> Config<C> {
    pub fn new(proposer: Proposer<C>) -> Self {
        Self { proposer }
    }

    pub fn me(&self) -> &NodeAddr {
        self.proposer.me()
    }

    pub(crate) fn acceptor(&self) -> &AcceptorHandle<View> {
        self.proposer.acceptor()
    }

    /// The latest decided view and its id, `(0, [])` if there is none yet.
    pub async fn current_view(&self) -> Result<(ViewId, View), ShutDown> {
        Ok(self.acceptor().latest().await?.unwrap_or((0, View::empty())))
    }

    /// The view preceding the latest one.
    pub async fn previous_view(&self) -> Result<View, ShutDown> {
        let (vid, _) = self.current_view().await?;

        if vid <= 1 {
            Ok(View::empty())
        } else {
            self.view(vid - 1).await
        }
    }

    /// View `vid`, empty if it wasn't decided yet.
    pub async fn view(&self, vid: ViewId) -> Result<View, ShutDown> {
        Ok(self.acceptor().decided(vid).await?.unwrap_or_default())
    }

    pub async fn is_member(&self, node: &NodeAddr) -> Result<bool, ShutDown> {
        Ok(self.current_view().await?.1.contains(node))
    }

    /// Agrees on a view that adds `node` to the current one.
    ///
    /// Resolves to the id of the new view. If another view was decided
    /// concurrently, the caller is expected to reexamine the situation.
    pub async fn add(&self, node: NodeAddr) -> Result<ViewId, ChangeError> {
        let (vid, view) = self.current_view().await?;

        if vid == 0 {
            return Err(ChangeError::NoView);
        }
        if view.contains(&node) {
            return Err(ChangeError::Unchanged);
        }

        tracing::info!("Node {} proposes to add {} to view {} {}.", self.me(), node, vid, view);

        let proposed = view.with(node);
        self.change(vid + 1, view, proposed).await
    }

    /// Agrees on a view that removes `node` from the current one.
    pub async fn remove(&self, node: &NodeAddr) -> Result<ViewId, ChangeError> {
        let (vid, view) = self.current_view().await?;

        if vid == 0 {
            return Err(ChangeError::NoView);
        }
        if !view.contains(node) {
            return Err(ChangeError::Unchanged);
        }

        tracing::info!(
            "Node {} proposes to remove {} from view {} {}.",
            self.me(),
            node,
            vid,
            view
        );

        let proposed = view.without(node);
        self.change(vid + 1, view, proposed).await
    }

    async fn change(
        &self,
        instance: Instance,
        among: View,
        proposed: View,
    ) -> Result<ViewId, ChangeError> {
        let decided = self
            .proposer
            .run(instance, among.members(), proposed.clone())
            .await?;

        if decided == proposed {
            Ok(instance)
        } else {
            // an earlier proposal for the instance prevailed
            tracing::info!("View {} became {} instead of {}.", instance, decided, proposed);

            Err(ChangeError::Superseded { vid: instance, decided })
        }
    }

    /// All decided views, oldest first.
    pub async fn dump(&self) -> Result<Vec<(ViewId, View)>, ShutDown> {
        self.acceptor().history(1).await
    }

    /// Adopts views decided elsewhere. Resolves to the latest view id known
    /// afterwards.
    pub async fn restore(&self, history: Vec<(ViewId, View)>) -> Result<ViewId, AcceptorError> {
        self.acceptor().catch_up(history).await
    }
}
