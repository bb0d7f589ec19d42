//! Shared-node discovery between workers.
//!
//! A node is *shared* when elements owned by more than one worker reference
//! it. For every ordered worker pair `(i, j)`, `i != j`, the registry
//! intersects the two sorted local→global maps with a single merge pass and
//! records `j` as a sharing peer on every common node of worker `i`.
//!
//! Each node has room for [`MAX_SHARING_PEERS`] peers, the width of the
//! on-disk descriptor record. Overflow is an error, never a truncation.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::completion::size_exchange::exchange_all_bytes;
use crate::algs::wire::{WireGlobalId, cast_slice, decode_records};
use crate::mesh_error::MeshHaloError;
use crate::partitioning::PartitionId;
use crate::topology::{LocalMesh, MeshArena};
use itertools::{EitherOrBoth, Itertools};
use static_assertions::const_assert;

/// Capacity of a node's sharing-peer list.
pub const MAX_SHARING_PEERS: usize = 4;

const_assert!(MAX_SHARING_PEERS <= u8::MAX as usize);

/// Tag used by [`BoundaryRegistry::discover`].
pub const DISCOVER_TAG: CommTag = CommTag::new(0x0B00);

/// Bounded, insertion-ordered list of peer ranks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharingPeers {
    len: u8,
    peers: [u32; MAX_SHARING_PEERS],
}

impl SharingPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `peer` for node `global_id`; fails once the list is full.
    pub fn push(&mut self, peer: PartitionId, global_id: u32) -> Result<(), MeshHaloError> {
        let n = self.len as usize;
        if n == MAX_SHARING_PEERS {
            return Err(MeshHaloError::CapacityExceeded {
                global_id,
                capacity: MAX_SHARING_PEERS,
            });
        }
        self.peers[n] = peer as u32;
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.peers[..self.len as usize]
    }

    pub fn contains(&self, peer: PartitionId) -> bool {
        self.as_slice().iter().any(|&p| p as usize == peer)
    }
}

/// Sharing information for one local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundaryDescriptor {
    pub global_id: u32,
    pub peers: SharingPeers,
}

impl BoundaryDescriptor {
    pub fn interior(global_id: u32) -> Self {
        Self {
            global_id,
            peers: SharingPeers::new(),
        }
    }

    pub fn is_shared(&self) -> bool {
        !self.peers.is_empty()
    }

    pub fn share_count(&self) -> usize {
        self.peers.len()
    }
}

/// Descriptors of one worker, indexed by local node id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerBoundary {
    rank: PartitionId,
    descriptors: Vec<BoundaryDescriptor>,
}

impl WorkerBoundary {
    pub fn new(rank: PartitionId, descriptors: Vec<BoundaryDescriptor>) -> Self {
        Self { rank, descriptors }
    }

    /// All-interior descriptors for `mesh`.
    pub fn interior(mesh: &LocalMesh) -> Self {
        Self {
            rank: mesh.rank(),
            descriptors: mesh
                .local_to_global()
                .iter()
                .map(|&g| BoundaryDescriptor::interior(g))
                .collect(),
        }
    }

    pub fn rank(&self) -> PartitionId {
        self.rank
    }

    pub fn descriptors(&self) -> &[BoundaryDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, local: u32) -> Option<&BoundaryDescriptor> {
        self.descriptors.get(local as usize)
    }

    /// Local ids of shared nodes, ascending.
    pub fn shared_nodes(&self) -> Vec<u32> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_shared())
            .map(|(l, _)| l as u32)
            .collect()
    }

    pub fn num_shared(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_shared()).count()
    }

    /// Every rank this worker shares at least one node with, ascending.
    pub fn neighbour_ranks(&self) -> Vec<PartitionId> {
        self.descriptors
            .iter()
            .flat_map(|d| d.peers.as_slice().iter().map(|&p| p as usize))
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Local ids shared with `peer`, ascending (hence also ascending by
    /// global id).
    pub fn nodes_shared_with(&self, peer: PartitionId) -> Vec<u32> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.peers.contains(peer))
            .map(|(l, _)| l as u32)
            .collect()
    }

    /// Add `peer` to every node of `mine` that also appears in `theirs`.
    /// Both slices must be sorted ascending.
    fn intersect_with(
        &mut self,
        mine: &[u32],
        peer: PartitionId,
        theirs: &[u32],
    ) -> Result<usize, MeshHaloError> {
        let mut common = 0;
        for pair in mine
            .iter()
            .enumerate()
            .merge_join_by(theirs, |(_, a), b| (*a).cmp(b))
        {
            if let EitherOrBoth::Both((l, &g), _) = pair {
                self.descriptors[l].peers.push(peer, g)?;
                common += 1;
            }
        }
        Ok(common)
    }
}

/// Boundary descriptors for a whole worker group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryRegistry {
    workers: Vec<WorkerBoundary>,
}

impl BoundaryRegistry {
    /// Intersect every ordered pair of worker meshes.
    pub fn build(arena: &MeshArena) -> Result<Self, MeshHaloError> {
        let meshes = arena.as_slice();
        let one = |i: usize| -> Result<WorkerBoundary, MeshHaloError> {
            let mut wb = WorkerBoundary::interior(&meshes[i]);
            let mine = meshes[i].local_to_global();
            for (j, other) in meshes.iter().enumerate() {
                if j == i {
                    continue;
                }
                wb.intersect_with(mine, j, other.local_to_global())?;
            }
            Ok(wb)
        };

        #[cfg(feature = "rayon")]
        let workers = {
            use rayon::prelude::*;
            (0..meshes.len())
                .into_par_iter()
                .map(one)
                .collect::<Result<Vec<_>, _>>()?
        };
        #[cfg(not(feature = "rayon"))]
        let workers = (0..meshes.len()).map(one).collect::<Result<Vec<_>, _>>()?;

        for wb in &workers {
            log::debug!(
                "rank {}: {} shared nodes, neighbours {:?}",
                wb.rank,
                wb.num_shared(),
                wb.neighbour_ranks()
            );
        }
        Ok(Self { workers })
    }

    /// Distributed variant: every worker sends its sorted global ids to every
    /// peer and intersects what it receives with its own. Collective.
    pub fn discover<C>(comm: &C, mesh: &LocalMesh) -> Result<WorkerBoundary, MeshHaloError>
    where
        C: Communicator + ?Sized,
    {
        let me = comm.rank();
        let ids: Vec<WireGlobalId> = mesh
            .local_to_global()
            .iter()
            .map(|&g| WireGlobalId::of(g))
            .collect();
        let bytes = cast_slice(&ids).to_vec();
        let incoming = exchange_all_bytes(comm, DISCOVER_TAG, vec![bytes; comm.size()])?;

        let mut wb = WorkerBoundary::interior(mesh);
        for (peer, raw) in incoming.into_iter().enumerate() {
            if peer == me {
                continue;
            }
            let theirs: Vec<u32> = decode_records::<WireGlobalId>(&raw)
                .map_err(|e| MeshHaloError::comm(peer, e))?
                .iter()
                .map(WireGlobalId::get)
                .collect();
            if !theirs.is_sorted() {
                return Err(MeshHaloError::comm(peer, "global id list is not sorted"));
            }
            let common = wb.intersect_with(mesh.local_to_global(), peer, &theirs)?;
            if common > 0 {
                log::debug!("rank {me}: {common} nodes shared with rank {peer}");
            }
        }
        log::info!("rank {me}: {} of {} nodes shared", wb.num_shared(), mesh.num_nodes());
        Ok(wb)
    }

    pub fn from_workers(workers: Vec<WorkerBoundary>) -> Self {
        Self { workers }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, w: PartitionId) -> Option<&WorkerBoundary> {
        self.workers.get(w)
    }

    pub fn workers(&self) -> &[WorkerBoundary] {
        &self.workers
    }

    pub fn into_workers(self) -> Vec<WorkerBoundary> {
        self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use crate::topology::NodeData;
    use std::thread;

    fn mesh(rank: usize, conn: &[[u32; 3]]) -> LocalMesh {
        LocalMesh::from_global_elements(rank, conn, vec![[0; 3]; conn.len()], |g| {
            Ok(NodeData {
                coord: [g as f64, 0.0],
                value: 0.0,
            })
        })
        .unwrap()
    }

    #[test]
    fn two_triangles_share_an_edge() {
        let arena = MeshArena::new(vec![mesh(0, &[[0, 1, 2]]), mesh(1, &[[1, 2, 3]])]);
        let reg = BoundaryRegistry::build(&arena).unwrap();
        let w0 = reg.worker(0).unwrap();
        assert_eq!(w0.shared_nodes(), vec![1, 2]);
        assert_eq!(w0.descriptor(1).unwrap().peers.as_slice(), &[1]);
        assert_eq!(w0.descriptor(1).unwrap().share_count(), 1);
        assert!(!w0.descriptor(0).unwrap().is_shared());
        let w1 = reg.worker(1).unwrap();
        // globals 1 and 2 are local 0 and 1 on worker 1
        assert_eq!(w1.shared_nodes(), vec![0, 1]);
        assert_eq!(w1.neighbour_ranks(), vec![0]);
    }

    #[test]
    fn single_worker_has_no_shared_nodes() {
        let arena = MeshArena::new(vec![mesh(0, &[[0, 1, 2], [1, 2, 3]])]);
        let reg = BoundaryRegistry::build(&arena).unwrap();
        assert_eq!(reg.worker(0).unwrap().num_shared(), 0);
        assert!(reg.worker(0).unwrap().neighbour_ranks().is_empty());
    }

    #[test]
    fn fifth_peer_overflows() {
        // six triangles fanned around node 0, one per worker
        let meshes = (0..6)
            .map(|w| mesh(w, &[[0, w as u32 + 1, w as u32 + 2]]))
            .collect();
        let err = BoundaryRegistry::build(&MeshArena::new(meshes)).unwrap_err();
        assert!(matches!(
            err,
            MeshHaloError::CapacityExceeded {
                global_id: 0,
                capacity: MAX_SHARING_PEERS
            }
        ));
    }

    #[test]
    fn discover_matches_build() {
        let conns: Vec<Vec<[u32; 3]>> = vec![
            vec![[0, 1, 4], [1, 5, 4]],
            vec![[1, 2, 5], [2, 6, 5]],
            vec![[2, 3, 6], [3, 7, 6]],
        ];
        let arena = MeshArena::new(
            conns
                .iter()
                .enumerate()
                .map(|(w, c)| mesh(w, c))
                .collect(),
        );
        let expected = BoundaryRegistry::build(&arena).unwrap();
        let comms = ThreadComm::world(3, None).unwrap();
        let found: Vec<WorkerBoundary> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    let m = &arena[c.rank()];
                    s.spawn(move || BoundaryRegistry::discover(c, m))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });
        assert_eq!(found, expected.into_workers());
    }
}
