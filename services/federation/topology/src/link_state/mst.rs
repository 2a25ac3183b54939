//! Prim's algorithm over the link-state adjacency.

use super::{AdjacencyRow, Link, LinkSet, LinkStatus, RepoKey};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Compute the minimum spanning tree of the root's component.
///
/// Directed cells are folded into undirected edges, each weighted with the
/// cheapest `On` sample in either direction; self-loops and `Off` cells are
/// ignored. The root is the smallest repository with a usable edge. Ties are
/// broken by (cost, smaller endpoint, larger endpoint), so the result
/// depends only on adjacency content.
pub fn minimum_spanning_tree(adjacency: &AdjacencyRow) -> LinkSet {
    let mut edges: BTreeMap<Link, u32> = BTreeMap::new();
    for (&source, column) in adjacency {
        for (&destination, cell) in column {
            if source == destination || cell.status == LinkStatus::Off {
                continue;
            }
            edges
                .entry(Link::new(source, destination))
                .and_modify(|cost| *cost = (*cost).min(cell.cost))
                .or_insert(cell.cost);
        }
    }

    let mut neighbors: BTreeMap<RepoKey, Vec<(Link, u32)>> = BTreeMap::new();
    for (&link, &cost) in &edges {
        neighbors.entry(link.first()).or_default().push((link, cost));
        neighbors.entry(link.second()).or_default().push((link, cost));
    }

    let mut tree = LinkSet::new();
    let Some(&root) = neighbors.keys().next() else {
        return tree;
    };

    let mut visited = BTreeSet::from([root]);
    let mut frontier: BinaryHeap<Reverse<(u32, Link)>> = BinaryHeap::new();
    push_edges(&neighbors, &visited, root, &mut frontier);

    while let Some(Reverse((_, link))) = frontier.pop() {
        // Both endpoints already in the tree: the edge would close a cycle
        let next = if !visited.contains(&link.first()) {
            link.first()
        } else if !visited.contains(&link.second()) {
            link.second()
        } else {
            continue;
        };

        visited.insert(next);
        tree.insert(link);
        push_edges(&neighbors, &visited, next, &mut frontier);
    }

    tree
}

fn push_edges(
    neighbors: &BTreeMap<RepoKey, Vec<(Link, u32)>>,
    visited: &BTreeSet<RepoKey>,
    vertex: RepoKey,
    frontier: &mut BinaryHeap<Reverse<(u32, Link)>>,
) {
    for &(link, cost) in neighbors.get(&vertex).into_iter().flatten() {
        if link.other(vertex).is_some_and(|peer| !visited.contains(&peer)) {
            frontier.push(Reverse((cost, link)));
        }
    }
}
