//! Consumption of externally computed partitions.
//!
//! The crate never partitions a mesh itself; it only applies a permutation
//! produced elsewhere and answers ownership queries against it.

pub mod planner;

pub use planner::{PartitionPlanner, Permutation, invert};

/// Index of a worker / partition.
pub type PartitionId = usize;
