//! MeshHaloError: Unified error type for mesh-halo public APIs
//!
//! Every fallible operation in the crate returns this error instead of
//! terminating the process, so a failing worker can report upward and abort
//! its peers through the communicator.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`MeshHaloError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown or missing settings, inconsistent partition tables.
    Configuration,
    /// Missing, truncated or unwritable files.
    Io,
    /// A decoded index falls outside its valid range.
    Index,
    /// A bounded collection overflowed.
    Capacity,
    /// Message passing failed, timed out or was aborted.
    Communication,
}

/// Unified error type for mesh-halo operations.
#[derive(Debug, Error)]
pub enum MeshHaloError {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Per-partition counts do not add up to the global entity count.
    #[error("partition counts for {what} sum to {found}, expected {expected}")]
    PartitionCountMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A table was built for a different number of workers.
    #[error("worker count mismatch: expected {expected}, found {found}")]
    WorkerCountMismatch { expected: usize, found: usize },
    /// Underlying filesystem failure.
    #[error("I/O error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A binary file holds fewer bytes than its header promises.
    #[error("file `{}` truncated: expected {expected} bytes, found {found}", path.display())]
    TruncatedFile {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    /// The text `minf` file could not be parsed.
    #[error("malformed mesh info `{}`: {line}", path.display())]
    MalformedInfo { path: PathBuf, line: String },
    /// A decoded index lies outside `[0, bound)`.
    #[error("{what} index {index} out of range [0, {bound})")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        bound: usize,
    },
    /// A boundary descriptor would hold more sharing workers than it can.
    #[error("node {global_id} is shared by more than {capacity} workers")]
    CapacityExceeded { global_id: u32, capacity: usize },
    /// A message exchange with a neighbor failed.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A blocking collective waited past the configured deadline.
    #[error("rank {rank} timed out after {after:?} in {op}")]
    Timeout {
        op: &'static str,
        rank: usize,
        after: Duration,
    },
    /// Another worker aborted the group.
    #[error("worker group aborted (seen by rank {rank}): {reason}")]
    Aborted { rank: usize, reason: String },
}

impl MeshHaloError {
    /// Which family of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshHaloError::Config(_)
            | MeshHaloError::PartitionCountMismatch { .. }
            | MeshHaloError::WorkerCountMismatch { .. } => ErrorKind::Configuration,
            MeshHaloError::Io { .. }
            | MeshHaloError::TruncatedFile { .. }
            | MeshHaloError::MalformedInfo { .. } => ErrorKind::Io,
            MeshHaloError::IndexOutOfRange { .. } => ErrorKind::Index,
            MeshHaloError::CapacityExceeded { .. } => ErrorKind::Capacity,
            MeshHaloError::CommError { .. }
            | MeshHaloError::Timeout { .. }
            | MeshHaloError::Aborted { .. } => ErrorKind::Communication,
        }
    }

    /// Attach a path to a bare [`std::io::Error`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshHaloError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        MeshHaloError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
