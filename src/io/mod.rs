//! Mesh file I/O.
//!
//! [`binary`] handles fixed-width arrays in a configurable byte order,
//! [`mesh_files`] the global file set, and [`partitioned`] the per-worker
//! `proc_<rank>/` trees written by the pre-partition step.

pub mod binary;
pub mod mesh_files;
pub mod partitioned;

pub use binary::Codec;
pub use mesh_files::{MeshInfo, MeshPaths, MeshReader, MeshWriter};
pub use partitioned::{WorkerTree, read_worker_tree, reassemble, worker_dir, write_worker_tree};
