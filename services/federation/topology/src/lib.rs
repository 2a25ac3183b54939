//! Repository link-state topology and minimum spanning tree maintenance for federation.
//!
//! This crate keeps a sparse, versioned directed adjacency of
//! repository-to-repository links and recomputes a deterministic minimum
//! spanning tree on every accepted sample, reporting which links joined or
//! left the tree so the caller can establish or tear down data links.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod link_state;

pub use link_state::*;
