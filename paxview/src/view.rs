//! Defines [`NodeAddr`], [`View`] and [`Viewstamp`].

use serde::Deserialize;
use serde::Serialize;

use crate::proposal::Instance;

/// Address of a node.
///
/// Addresses are compared as strings. The lowest addressed node of a view is
/// the one that takes over as primary when the previous primary is gone.
#[derive(
    Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct NodeAddr(String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_owned())
    }
}

impl From<String> for NodeAddr {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Identifies a view. View `vid` is the value decided by Paxos instance
/// `vid`, `0` denotes "no view".
pub type ViewId = Instance;

/// The members of a view, in the order in which they were admitted.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct View(Vec<NodeAddr>);

impl View {
    pub fn new(members: impl IntoIterator<Item = NodeAddr>) -> Self {
        let mut distinct: Vec<NodeAddr> = Vec::new();

        for m in members {
            if !distinct.contains(&m) {
                distinct.push(m);
            }
        }

        Self(distinct)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn members(&self) -> &[NodeAddr] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, node: &NodeAddr) -> bool {
        self.0.contains(node)
    }

    /// Number of members that make up a majority, `⌊n/2⌋ + 1`.
    pub fn majority(&self) -> usize {
        majority_of(self.0.len())
    }

    /// The lowest addressed member.
    pub fn lowest(&self) -> Option<&NodeAddr> {
        self.0.iter().min()
    }

    /// This view with `node` appended, unless it's a member already.
    pub fn with(&self, node: NodeAddr) -> Self {
        let mut members = self.0.clone();

        if !members.contains(&node) {
            members.push(node);
        }

        Self(members)
    }

    /// This view without `node`.
    pub fn without(&self, node: &NodeAddr) -> Self {
        Self(self.0.iter().filter(|m| *m != node).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeAddr> {
        self.0.iter()
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", m)?;
        }
        f.write_str("]")
    }
}

impl FromIterator<NodeAddr> for View {
    fn from_iter<T: IntoIterator<Item = NodeAddr>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a View {
    type Item = &'a NodeAddr;
    type IntoIter = std::slice::Iter<'a, NodeAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Number of nodes that make up a majority of `n` nodes.
pub fn majority_of(n: usize) -> usize {
    n / 2 + 1
}

/// Orders operations of the replicated state machine.
///
/// Within a view the sequence number increases by one with every operation
/// the primary commits to. The first operation of view `vid` is stamped
/// `(vid, 1)`.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize,
)]
pub struct Viewstamp {
    pub vid: ViewId,
    pub seqno: u64,
}

impl Viewstamp {
    pub fn new(vid: ViewId, seqno: u64) -> Self {
        Self { vid, seqno }
    }

    /// Stamp of the first operation in view `vid`.
    pub fn first_of(vid: ViewId) -> Self {
        Self { vid, seqno: 1 }
    }

    pub fn next(self) -> Self {
        Self {
            vid: self.vid,
            seqno: self.seqno + 1,
        }
    }
}

impl std::fmt::Display for Viewstamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.vid, self.seqno)
    }
}
