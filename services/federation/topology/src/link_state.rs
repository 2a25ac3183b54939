//! Versioned repository link-state topology and minimum spanning tree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Federation repository identifier
pub type RepoKey = u64;

/// Whether a sampled link is usable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Link is up
    #[default]
    On,
    /// Link is down; the sample still advances the sequence number
    Off,
}

/// Link-state sample received from a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    /// Repository reporting the link
    pub source: RepoKey,
    /// Repository at the far end
    pub destination: RepoKey,
    /// Link cost (lower is better)
    pub cost: u32,
    /// Sequence number, increasing per (source, destination)
    pub packet: u64,
    /// Link status
    #[serde(default)]
    pub status: LinkStatus,
}

impl LinkState {
    /// Usable link sample
    pub fn new(source: RepoKey, destination: RepoKey, cost: u32, packet: u64) -> Self {
        Self {
            source,
            destination,
            cost,
            packet,
            status: LinkStatus::On,
        }
    }

    /// Sample reporting the link down
    pub fn off(source: RepoKey, destination: RepoKey, packet: u64) -> Self {
        Self {
            status: LinkStatus::Off,
            ..Self::new(source, destination, 0, packet)
        }
    }
}

/// Undirected link, stored with the smaller key first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    first: RepoKey,
    second: RepoKey,
}

impl Link {
    /// Link between `a` and `b` in either direction
    pub fn new(a: RepoKey, b: RepoKey) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    /// Smaller endpoint
    pub fn first(&self) -> RepoKey {
        self.first
    }

    /// Larger endpoint
    pub fn second(&self) -> RepoKey {
        self.second
    }

    /// Endpoint opposite `local`, if `local` is on this link
    pub fn other(&self, local: RepoKey) -> Option<RepoKey> {
        if local == self.first {
            Some(self.second)
        } else if local == self.second {
            Some(self.first)
        } else {
            None
        }
    }
}

/// Ordered set of MST links
pub type LinkSet = BTreeSet<Link>;

/// Links in ascending order
pub type LinkList = Vec<Link>;

/// Last accepted sample for one directed link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacencyCell {
    /// Link cost
    pub cost: u32,
    /// Highest accepted sequence number
    pub packet: u64,
    /// Link status
    pub status: LinkStatus,
}

/// Destination to cell
pub type AdjacencyColumn = BTreeMap<RepoKey, AdjacencyCell>;

/// Source to column
pub type AdjacencyRow = BTreeMap<RepoKey, AdjacencyColumn>;

/// Result of one [`LinkStateManager::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStateUpdate {
    /// True when the MST changed
    pub modified: bool,
    /// Links no longer on the MST
    pub removed: LinkList,
    /// Links newly on the MST
    pub added: LinkList,
}

/// Link-state topology with its current MST.
///
/// Callers serialize access; the manager does no locking.
#[derive(Debug, Default)]
pub struct LinkStateManager {
    /// Directed adjacency, sparse
    adjacency: AdjacencyRow,
    /// Current minimum spanning tree
    mst: LinkSet,
}

// Include implementation
mod manager;
mod mst;
pub use manager::LinkStateStats;
pub use mst::minimum_spanning_tree;
