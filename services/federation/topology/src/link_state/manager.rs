//! LinkStateManager implementation methods.

use super::{
    minimum_spanning_tree, AdjacencyCell, AdjacencyRow, LinkSet, LinkState, LinkStateManager,
    LinkStateUpdate, RepoKey,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

impl LinkStateManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one link-state sample and recompute the MST.
    ///
    /// Samples whose sequence number does not exceed the stored one for the
    /// same (source, destination) are ignored and reported unmodified.
    pub fn update(&mut self, state: &LinkState) -> LinkStateUpdate {
        let column = self.adjacency.entry(state.source).or_default();

        if let Some(cell) = column.get(&state.destination) {
            if cell.packet >= state.packet {
                debug!(
                    "Ignoring stale link state {} -> {} (packet: {} vs {})",
                    state.source, state.destination, state.packet, cell.packet
                );
                return LinkStateUpdate::default();
            }
        }

        if state.source == state.destination {
            debug!("Storing self-loop link state for repository {}", state.source);
        }

        column.insert(
            state.destination,
            AdjacencyCell {
                cost: state.cost,
                packet: state.packet,
                status: state.status,
            },
        );

        let mst = minimum_spanning_tree(&self.adjacency);
        let removed: Vec<_> = self.mst.difference(&mst).copied().collect();
        let added: Vec<_> = mst.difference(&self.mst).copied().collect();
        let modified = !removed.is_empty() || !added.is_empty();

        if modified {
            info!(
                "MST changed after link state {} -> {} (packet: {}): {} added, {} removed, {} links",
                state.source,
                state.destination,
                state.packet,
                added.len(),
                removed.len(),
                mst.len()
            );
        }

        self.mst = mst;

        LinkStateUpdate {
            modified,
            removed,
            added,
        }
    }

    /// Current minimum spanning tree
    pub fn mst(&self) -> &LinkSet {
        &self.mst
    }

    /// Raw directed adjacency
    pub fn adjacency(&self) -> &AdjacencyRow {
        &self.adjacency
    }

    /// Last accepted sample for a directed link
    pub fn cell(&self, source: RepoKey, destination: RepoKey) -> Option<&AdjacencyCell> {
        self.adjacency.get(&source)?.get(&destination)
    }

    /// Repositories adjacent to `local` on the MST
    pub fn mst_neighbors(&self, local: RepoKey) -> BTreeSet<RepoKey> {
        self.mst.iter().filter_map(|link| link.other(local)).collect()
    }

    /// Get topology statistics
    pub fn stats(&self) -> LinkStateStats {
        let mut repositories = BTreeSet::new();
        let mut cells = 0;
        for (&source, column) in &self.adjacency {
            repositories.insert(source);
            repositories.extend(column.keys().copied());
            cells += column.len();
        }

        LinkStateStats {
            repositories: repositories.len(),
            cells,
            mst_links: self.mst.len(),
        }
    }
}

/// Link-state statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStateStats {
    /// Repositories named by any cell
    pub repositories: usize,
    /// Directed cells stored
    pub cells: usize,
    /// Links on the current MST
    pub mst_links: usize,
}
