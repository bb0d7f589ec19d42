#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-halo
//!
//! mesh-halo is the distributed mesh layer beneath a parallel finite-element
//! solver on linear triangles. It splits a global mesh across P workers
//! according to an externally computed partition permutation, discovers which
//! nodes sit on partition boundaries, and sums per-iteration nodal
//! contributions at every shared node as though the mesh had never been split.
//!
//! ## Features
//! - Prefix-sum partition tables with validated counts ([`partitioning`])
//! - Per-worker [`topology::LocalMesh`] with deterministic dense local ids
//! - Two interchangeable ways to build worker meshes:
//!   pre-partition to per-worker file trees ([`algs::distribute`]) or
//!   parallel read with a two-phase deposit protocol ([`algs::parallel_read`])
//! - Boundary discovery with bounded sharing descriptors ([`overlap`])
//! - Ring or pairwise halo summation ([`algs::completion::halo_exchange`])
//! - Pluggable communication backends: serial, in-process threads, and MPI
//!   behind `mpi-support`, all with coordinated abort
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-halo = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ## Determinism
//!
//! Local ids follow ascending global id and worker element order follows the
//! permutation, so decomposing the same input twice writes byte-identical
//! worker files. Halo totals do not depend on message arrival order.

pub mod algs;
pub mod config;
pub mod io;
pub mod mesh_error;
pub mod overlap;
pub mod partitioning;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::completion::HaloExchanger;
    pub use crate::algs::distribute::{GlobalMesh, decompose, decompose_to_disk};
    pub use crate::algs::parallel_read::{read_partitioned, setup_worker};
    pub use crate::algs::workers::run_workers;
    pub use crate::config::{DecompConfig, Endian, HaloStrategy};
    pub use crate::io::partitioned::{read_worker_tree, reassemble};
    pub use crate::mesh_error::{ErrorKind, MeshHaloError};
    pub use crate::overlap::{BoundaryDescriptor, BoundaryRegistry, WorkerBoundary};
    pub use crate::partitioning::{PartitionPlanner, Permutation};
    pub use crate::topology::{LocalMesh, MeshArena};
}
