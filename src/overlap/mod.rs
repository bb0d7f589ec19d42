//! Overlap between worker meshes: which nodes are shared, and with whom.
//!
//! See [`boundary`] for discovery and the per-node sharing descriptors
//! consumed by the halo exchange.

pub mod boundary;

pub use boundary::{
    BoundaryDescriptor, BoundaryRegistry, MAX_SHARING_PEERS, SharingPeers, WorkerBoundary,
};
