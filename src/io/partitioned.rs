//! Per-worker file trees: `proc_<rank>/` holding a self-contained local mesh.
//!
//! Each tree repeats the global layouts (`minf`, `mxyz`, `mien`, `mrng`,
//! optional `data`) in local numbering, plus `procb` with one fixed record per
//! local node `{globalId, shareCount, peer0..peer3}` and a small JSON
//! metadata file. Unused peer slots hold `-1`.

use crate::config::MeshFileNames;
use crate::io::binary::{Codec, INT_WIDTH};
use crate::io::mesh_files::{MeshInfo, MeshPaths, MeshReader, MeshWriter};
use crate::mesh_error::MeshHaloError;
use crate::overlap::{BoundaryDescriptor, MAX_SHARING_PEERS, SharingPeers, WorkerBoundary};
use crate::partitioning::PartitionId;
use crate::topology::{LocalMesh, NODES_PER_ELEMENT, SPACE_DIM};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fs;
use std::path::{Path, PathBuf};

const WORKER_METADATA_VERSION: u32 = 1;

/// Ints per `procb` record.
pub const PROCB_RECORD: usize = 2 + MAX_SHARING_PEERS;

const_assert_eq!(PROCB_RECORD, 6);

const PROCB_FILE: &str = "procb";
const META_FILE: &str = "meta.json";

/// Metadata describing one worker tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetadata {
    /// Metadata format version.
    pub version: u32,
    pub rank: usize,
    /// Number of workers in the decomposition.
    pub size: usize,
    pub ne: usize,
    pub nn: usize,
    pub shared_nodes: usize,
    /// Whether a `data` file was written.
    pub has_field: bool,
}

/// `root/proc_<rank>`.
pub fn worker_dir(root: &Path, rank: PartitionId) -> PathBuf {
    root.join(format!("proc_{rank}"))
}

/// Flatten descriptors into `procb` ints.
pub fn encode_procb(boundary: &WorkerBoundary) -> Vec<i32> {
    let mut out = Vec::with_capacity(boundary.descriptors().len() * PROCB_RECORD);
    for d in boundary.descriptors() {
        out.push(d.global_id as i32);
        out.push(d.share_count() as i32);
        let peers = d.peers.as_slice();
        for k in 0..MAX_SHARING_PEERS {
            out.push(peers.get(k).map_or(-1, |&p| p as i32));
        }
    }
    out
}

/// Decode `procb` ints for worker `rank` of `size`.
pub fn decode_procb(
    raw: &[i32],
    rank: PartitionId,
    size: usize,
) -> Result<Vec<BoundaryDescriptor>, MeshHaloError> {
    if raw.len() % PROCB_RECORD != 0 {
        return Err(MeshHaloError::Config(format!(
            "procb holds {} ints, not a multiple of {PROCB_RECORD}",
            raw.len()
        )));
    }
    raw.chunks_exact(PROCB_RECORD)
        .map(|rec| {
            let global_id = u32::try_from(rec[0]).map_err(|_| MeshHaloError::IndexOutOfRange {
                what: "procb global id",
                index: i64::from(rec[0]),
                bound: u32::MAX as usize,
            })?;
            let count = usize::try_from(rec[1]).map_err(|_| {
                MeshHaloError::Config(format!("negative share count {} for node {global_id}", rec[1]))
            })?;
            if count > MAX_SHARING_PEERS {
                return Err(MeshHaloError::CapacityExceeded {
                    global_id,
                    capacity: MAX_SHARING_PEERS,
                });
            }
            let mut peers = SharingPeers::new();
            for &p in &rec[2..2 + count] {
                if p < 0 || p as usize >= size || p as usize == rank {
                    return Err(MeshHaloError::IndexOutOfRange {
                        what: "procb peer",
                        index: i64::from(p),
                        bound: size,
                    });
                }
                peers.push(p as usize, global_id)?;
            }
            Ok(BoundaryDescriptor { global_id, peers })
        })
        .collect()
}

/// Write one worker's tree under `root`; returns the tree's directory.
pub fn write_worker_tree(
    root: &Path,
    names: &MeshFileNames,
    codec: Codec,
    size: usize,
    mesh: &LocalMesh,
    boundary: &WorkerBoundary,
    with_field: bool,
) -> Result<PathBuf, MeshHaloError> {
    let dir = worker_dir(root, mesh.rank());
    let w = MeshWriter::create(&dir, names, size, codec)?;
    w.info(MeshInfo {
        ne: mesh.num_elements(),
        nn: mesh.num_nodes(),
    })?;
    w.coords(mesh.coords())?;
    w.connectivity(mesh.elements())?;
    w.face_tags(mesh.face_tags())?;
    if with_field {
        w.field(mesh.field())?;
    } else {
        // a field left by an earlier run must not be read back
        let stale = &w.paths().data;
        if stale.is_file() {
            fs::remove_file(stale).map_err(|e| MeshHaloError::io(stale, e))?;
        }
    }
    codec.write_i32s(&dir.join(PROCB_FILE), &encode_procb(boundary))?;

    let meta = WorkerMetadata {
        version: WORKER_METADATA_VERSION,
        rank: mesh.rank(),
        size,
        ne: mesh.num_elements(),
        nn: mesh.num_nodes(),
        shared_nodes: boundary.num_shared(),
        has_field: with_field,
    };
    let meta_path = dir.join(META_FILE);
    let meta_bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| MeshHaloError::Config(format!("worker metadata: {e}")))?;
    fs::write(&meta_path, meta_bytes).map_err(|e| MeshHaloError::io(&meta_path, e))?;

    log::info!(
        "rank {}: wrote {} ({} elements, {} nodes, {} shared)",
        mesh.rank(),
        dir.display(),
        meta.ne,
        meta.nn,
        meta.shared_nodes
    );
    Ok(dir)
}

/// A worker tree read back from disk.
#[derive(Clone, Debug)]
pub struct WorkerTree {
    pub metadata: WorkerMetadata,
    pub mesh: LocalMesh,
    pub boundary: WorkerBoundary,
}

pub fn read_worker_metadata(root: &Path, rank: PartitionId) -> Result<WorkerMetadata, MeshHaloError> {
    let path = worker_dir(root, rank).join(META_FILE);
    let bytes = fs::read(&path).map_err(|e| MeshHaloError::io(&path, e))?;
    let meta: WorkerMetadata = serde_json::from_slice(&bytes)
        .map_err(|e| MeshHaloError::Config(format!("{}: {e}", path.display())))?;
    if meta.version != WORKER_METADATA_VERSION {
        return Err(MeshHaloError::Config(format!(
            "{}: unsupported metadata version {}",
            path.display(),
            meta.version
        )));
    }
    if meta.rank != rank {
        return Err(MeshHaloError::Config(format!(
            "{}: tree belongs to rank {}, expected {rank}",
            path.display(),
            meta.rank
        )));
    }
    Ok(meta)
}

/// Rebuild a worker's mesh and boundary descriptors from `root/proc_<rank>`.
/// The local→global map comes from the `procb` global ids.
pub fn read_worker_tree(
    root: &Path,
    names: &MeshFileNames,
    codec: Codec,
    rank: PartitionId,
    initial_value: f64,
) -> Result<WorkerTree, MeshHaloError> {
    let metadata = read_worker_metadata(root, rank)?;
    let dir = worker_dir(root, rank);
    let reader = MeshReader::new(MeshPaths::new(&dir, names, metadata.size), codec);
    let info = reader.info()?;
    if info.ne != metadata.ne || info.nn != metadata.nn {
        return Err(MeshHaloError::Config(format!(
            "rank {rank}: minf says {}/{} but metadata says {}/{}",
            info.ne, info.nn, metadata.ne, metadata.nn
        )));
    }

    let elements: Vec<[u32; NODES_PER_ELEMENT]> = reader.connectivity(0..info.ne, info.nn)?;
    let face_tags = reader.face_tags(0..info.ne)?;
    let coords: Vec<[f64; SPACE_DIM]> = reader.coords(0..info.nn)?;
    let field = if metadata.has_field {
        codec.read_f64_range(&reader.paths().data, 0, info.nn)?
    } else {
        vec![initial_value; info.nn]
    };

    let procb_path = dir.join(PROCB_FILE);
    let raw = codec.read_i32s(&procb_path)?;
    let expected = info.nn.saturating_mul(PROCB_RECORD);
    if raw.len() != expected {
        return Err(MeshHaloError::TruncatedFile {
            path: procb_path,
            expected: (expected as u64).saturating_mul(INT_WIDTH as u64),
            found: (raw.len() * INT_WIDTH) as u64,
        });
    }
    let descriptors = decode_procb(&raw, rank, metadata.size)?;
    let local_to_global = descriptors.iter().map(|d| d.global_id).collect();

    let mesh =
        LocalMesh::from_local_parts(rank, elements, face_tags, local_to_global, coords, field)?;
    Ok(WorkerTree {
        metadata,
        mesh,
        boundary: WorkerBoundary::new(rank, descriptors),
    })
}

/// Global coordinates and elements rebuilt from every worker tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Reassembled {
    /// Indexed by global node id.
    pub coords: Vec<[f64; SPACE_DIM]>,
    /// Global connectivity, worker by worker.
    pub elements: Vec<[u32; NODES_PER_ELEMENT]>,
}

/// Stitch `parts` worker trees back into global arrays of `nn` nodes. Every
/// global node id in `[0, nn)` must be covered, and copies held by several
/// workers must agree on their coordinates.
pub fn reassemble(
    root: &Path,
    names: &MeshFileNames,
    codec: Codec,
    parts: usize,
    nn: usize,
) -> Result<Reassembled, MeshHaloError> {
    let mut coords: Vec<Option<[f64; SPACE_DIM]>> = vec![None; nn];
    let mut elements = Vec::new();
    for rank in 0..parts {
        let tree = read_worker_tree(root, names, codec, rank, 0.0)?;
        if tree.metadata.size != parts {
            return Err(MeshHaloError::WorkerCountMismatch {
                expected: parts,
                found: tree.metadata.size,
            });
        }
        let mesh = &tree.mesh;
        for (l, &g) in mesh.local_to_global().iter().enumerate() {
            let slot = coords
                .get_mut(g as usize)
                .ok_or(MeshHaloError::IndexOutOfRange {
                    what: "node",
                    index: i64::from(g),
                    bound: nn,
                })?;
            let xy = mesh.coords()[l];
            match *slot {
                Some(prev) if prev != xy => {
                    return Err(MeshHaloError::Config(format!(
                        "node {g}: rank {rank} has {xy:?}, another worker has {prev:?}"
                    )));
                }
                _ => *slot = Some(xy),
            }
        }
        elements.extend((0..mesh.num_elements()).map(|e| mesh.element_global(e)));
    }
    let coords = coords
        .into_iter()
        .enumerate()
        .map(|(g, c)| {
            c.ok_or_else(|| MeshHaloError::Config(format!("node {g} is held by no worker")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Reassembled { coords, elements })
}
