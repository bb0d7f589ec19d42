//! Parallel-read mode: every worker builds its own [`LocalMesh`] straight from
//! the global files without any worker holding the whole mesh.
//!
//! Worker `w` reads only records `offsets[w]..offsets[w + 1]` of each file,
//! in original global order. Those records generally belong elsewhere, so
//! each one is deposited at `(owner, slot)` of its destination index:
//!
//! 1. element epoch: connectivity and face tags, barrier, consume;
//! 2. node epoch: `(global id, x, y, value)`, barrier, consume;
//! 3. local ids from the now complete element set;
//! 4. fetch epoch: every referenced node record is read from the sealed node
//!    buffer of its owner. Records owned elsewhere are the ghosts.
//! 5. coverage: a node record nobody fetched belongs to no element, which
//!    fails every worker.
//!
//! The result is identical to what the pre-partition mode builds for the same
//! permutation. A destination claimed twice or left empty fails the epoch.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::completion::size_exchange::all_gather_u64;
use crate::algs::window::{ExposedWindow, SlotRecord};
use crate::algs::wire::{WireElement, WireNode};
use crate::config::DecompConfig;
use crate::io::mesh_files::MeshReader;
use crate::mesh_error::MeshHaloError;
use crate::overlap::{BoundaryRegistry, WorkerBoundary};
use crate::topology::{FACES_PER_ELEMENT, LocalMesh, NODES_PER_ELEMENT, NodeData, referenced_nodes};

const ELEMENT_TAG: CommTag = CommTag::new(0x5C00);
const NODE_TAG: CommTag = ELEMENT_TAG.offset(1);
/// Fetch uses this tag and the next one.
const GHOST_TAG: CommTag = ELEMENT_TAG.offset(2);
const COVERAGE_TAG: CommTag = ELEMENT_TAG.offset(4);

/// One element in global node ids.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementRecord {
    pub conn: [u32; NODES_PER_ELEMENT],
    pub tags: [i32; FACES_PER_ELEMENT],
}

impl SlotRecord for ElementRecord {
    type Wire = WireElement;

    fn to_wire(&self, slot: usize) -> WireElement {
        WireElement::new(slot, self.conn, self.tags)
    }

    fn from_wire(w: &WireElement) -> (usize, Self) {
        (
            w.slot(),
            Self {
                conn: w.conn(),
                tags: w.tags(),
            },
        )
    }
}

/// One node with its original global id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeRecord {
    pub global_id: u32,
    pub data: NodeData,
}

impl SlotRecord for NodeRecord {
    type Wire = WireNode;

    fn to_wire(&self, slot: usize) -> WireNode {
        WireNode::new(slot, self.global_id, self.data.coord, self.data.value)
    }

    fn from_wire(w: &WireNode) -> (usize, Self) {
        (
            w.slot(),
            Self {
                // ids are written from a u32
                global_id: w.gid() as u32,
                data: NodeData {
                    coord: w.coord(),
                    value: w.value(),
                },
            },
        )
    }
}

/// Build this worker's mesh from the global files. Collective over `comm`,
/// whose size must equal `cfg.num_workers`.
pub fn read_partitioned<C>(comm: &C, cfg: &DecompConfig) -> Result<LocalMesh, MeshHaloError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let size = comm.size();
    if cfg.num_workers != size {
        return Err(MeshHaloError::WorkerCountMismatch {
            expected: cfg.num_workers,
            found: size,
        });
    }
    let reader = MeshReader::from_config(cfg);
    let info = reader.info()?;
    let eperm = reader.element_permutation(info.ne, size)?;
    let nperm = reader.node_permutation(info.nn, size)?;
    let eplan = eperm.planner("element")?;
    let nplan = nperm.planner("node")?;

    // only this worker's byte ranges
    let erange = eplan.range(me);
    let nrange = nplan.range(me);
    let conn = reader.connectivity(erange.clone(), info.nn)?;
    let tags = reader.face_tags(erange.clone())?;
    let coords = reader.coords(nrange.clone())?;
    if me == 0 && !reader.has_field() {
        log::warn!(
            "no initial field at {}, using {} everywhere",
            reader.paths().data.display(),
            cfg.initial_value
        );
    }
    let field = reader.field(nrange.clone(), cfg.initial_value)?;
    log::debug!(
        "rank {me}: read elements {erange:?} and nodes {nrange:?} of {}/{}",
        info.ne,
        info.nn
    );

    // element epoch
    let element_puts = erange
        .zip(conn.iter().zip(&tags))
        .map(|(orig, (&conn, &tags))| {
            let (owner, slot) = eplan.slot_of(eperm.dest(orig))?;
            Ok((owner, slot, ElementRecord { conn, tags }))
        })
        .collect::<Result<Vec<_>, MeshHaloError>>()?;
    let mut elements = ExposedWindow::new("element", eplan.count(me));
    elements.deposit(comm, ELEMENT_TAG, element_puts)?;
    let elements = elements.seal(me)?.into_vec();

    // node epoch
    let node_puts = nrange
        .zip(coords.iter().zip(&field))
        .map(|(orig, (&coord, &value))| {
            let (owner, slot) = nplan.slot_of(nperm.dest(orig))?;
            let record = NodeRecord {
                global_id: orig as u32,
                data: NodeData { coord, value },
            };
            Ok((owner, slot, record))
        })
        .collect::<Result<Vec<_>, MeshHaloError>>()?;
    let mut nodes = ExposedWindow::new("node", nplan.count(me));
    nodes.deposit(comm, NODE_TAG, node_puts)?;
    let mut nodes = nodes.seal(me)?;

    // local numbering is only known once every element has arrived
    let conn_global: Vec<[u32; NODES_PER_ELEMENT]> = elements.iter().map(|e| e.conn).collect();
    let face_tags = elements.iter().map(|e| e.tags).collect();
    let referenced = referenced_nodes(&conn_global);
    let requests = referenced
        .iter()
        .map(|&g| nplan.slot_of(nperm.dest(g as usize)))
        .collect::<Result<Vec<_>, _>>()?;
    let ghosts = requests.iter().filter(|(owner, _)| *owner != me).count();
    log::debug!(
        "rank {me}: {} referenced nodes, {ghosts} ghosts",
        referenced.len()
    );

    let fetched = nodes.fetch(comm, GHOST_TAG, &requests)?;
    let orphan = nodes.unfetched().next().map(|(_, rec)| rec.global_id);
    let orphans = all_gather_u64(comm, COVERAGE_TAG, orphan.map_or(u64::MAX, u64::from))?;
    if let Some(&g) = orphans.iter().find(|&&g| g != u64::MAX) {
        return Err(MeshHaloError::Config(format!(
            "node {g} is referenced by no element"
        )));
    }
    let mut fetched = fetched.into_iter();
    let mesh = LocalMesh::from_global_elements(me, &conn_global, face_tags, |g| {
        match fetched.next() {
            Some(rec) if rec.global_id == g => Ok(rec.data),
            Some(rec) => Err(MeshHaloError::Config(format!(
                "rank {me}: asked for node {g}, node buffer held {}",
                rec.global_id
            ))),
            None => Err(MeshHaloError::Config(format!(
                "rank {me}: no record fetched for node {g}"
            ))),
        }
    })?;
    log::info!(
        "rank {me}: {} elements, {} nodes ({ghosts} fetched from peers)",
        mesh.num_elements(),
        mesh.num_nodes()
    );
    Ok(mesh)
}

/// Parallel-read startup: [`read_partitioned`] followed by distributed
/// boundary discovery.
pub fn setup_worker<C>(
    comm: &C,
    cfg: &DecompConfig,
) -> Result<(LocalMesh, WorkerBoundary), MeshHaloError>
where
    C: Communicator + ?Sized,
{
    let mesh = read_partitioned(comm, cfg)?;
    let boundary = BoundaryRegistry::discover(comm, &mesh)?;
    Ok((mesh, boundary))
}
