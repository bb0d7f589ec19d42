//! Per-worker mesh storage with local↔global id maps.
//!
//! Local node ids are dense, 0-based and assigned in ascending global-id
//! order, so building the same worker twice from the same elements yields the
//! same numbering bit-for-bit. Topology is fixed after construction; only the
//! nodal field values change during a solve.

use crate::mesh_error::MeshHaloError;
use crate::partitioning::PartitionId;
use hashbrown::HashMap;
use itertools::Itertools;

/// Nodes per element (linear triangle).
pub const NODES_PER_ELEMENT: usize = 3;
/// Edges per element, each carrying a boundary tag.
pub const FACES_PER_ELEMENT: usize = 3;
/// Spatial dimension.
pub const SPACE_DIM: usize = 2;

/// Sparse global → local node map; absence means "not on this worker".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalToLocal(HashMap<u32, u32>);

impl GlobalToLocal {
    pub fn from_sorted(local_to_global: &[u32]) -> Self {
        let mut map = HashMap::with_capacity(local_to_global.len());
        for (l, &g) in local_to_global.iter().enumerate() {
            map.insert(g, l as u32);
        }
        Self(map)
    }

    pub fn get(&self, global: u32) -> Option<u32> {
        self.0.get(&global).copied()
    }

    pub fn contains(&self, global: u32) -> bool {
        self.0.contains_key(&global)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Coordinates and field value of one global node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeData {
    pub coord: [f64; SPACE_DIM],
    pub value: f64,
}

/// One worker's slice of the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMesh {
    rank: PartitionId,
    elements: Vec<[u32; NODES_PER_ELEMENT]>,
    face_tags: Vec<[i32; FACES_PER_ELEMENT]>,
    local_to_global: Vec<u32>,
    global_to_local: GlobalToLocal,
    coords: Vec<[f64; SPACE_DIM]>,
    field: Vec<f64>,
}

impl LocalMesh {
    /// Build a worker mesh from its elements given in global node ids.
    ///
    /// The referenced global ids are sorted and deduplicated to define the
    /// local numbering; `node` is then asked once per local node, in local-id
    /// order, for its coordinates and initial field value.
    pub fn from_global_elements<F>(
        rank: PartitionId,
        conn_global: &[[u32; NODES_PER_ELEMENT]],
        face_tags: Vec<[i32; FACES_PER_ELEMENT]>,
        mut node: F,
    ) -> Result<Self, MeshHaloError>
    where
        F: FnMut(u32) -> Result<NodeData, MeshHaloError>,
    {
        if conn_global.len() != face_tags.len() {
            return Err(MeshHaloError::Config(format!(
                "rank {rank}: {} elements but {} face-tag records",
                conn_global.len(),
                face_tags.len()
            )));
        }
        let local_to_global = referenced_nodes(conn_global);
        let global_to_local = GlobalToLocal::from_sorted(&local_to_global);

        let elements = conn_global
            .iter()
            .map(|conn| {
                let mut out = [0u32; NODES_PER_ELEMENT];
                for (dst, &g) in out.iter_mut().zip(conn) {
                    // every referenced id was inserted above
                    *dst = global_to_local.get(g).unwrap_or_default();
                }
                out
            })
            .collect();

        let mut coords = Vec::with_capacity(local_to_global.len());
        let mut field = Vec::with_capacity(local_to_global.len());
        for &g in &local_to_global {
            let data = node(g)?;
            coords.push(data.coord);
            field.push(data.value);
        }

        Ok(Self {
            rank,
            elements,
            face_tags,
            local_to_global,
            global_to_local,
            coords,
            field,
        })
    }

    /// Reassemble a worker mesh from already-local arrays (e.g. read back
    /// from a worker file tree).
    pub fn from_local_parts(
        rank: PartitionId,
        elements: Vec<[u32; NODES_PER_ELEMENT]>,
        face_tags: Vec<[i32; FACES_PER_ELEMENT]>,
        local_to_global: Vec<u32>,
        coords: Vec<[f64; SPACE_DIM]>,
        field: Vec<f64>,
    ) -> Result<Self, MeshHaloError> {
        let nn = local_to_global.len();
        if coords.len() != nn || field.len() != nn {
            return Err(MeshHaloError::Config(format!(
                "rank {rank}: {nn} nodes but {} coordinates and {} field values",
                coords.len(),
                field.len()
            )));
        }
        if elements.len() != face_tags.len() {
            return Err(MeshHaloError::Config(format!(
                "rank {rank}: {} elements but {} face-tag records",
                elements.len(),
                face_tags.len()
            )));
        }
        if let Some(&bad) = elements.iter().flatten().find(|&&l| l as usize >= nn) {
            return Err(MeshHaloError::IndexOutOfRange {
                what: "local node",
                index: i64::from(bad),
                bound: nn,
            });
        }
        // dense ids follow ascending global ids
        if let Some(pair) = local_to_global.windows(2).find(|p| p[0] >= p[1]) {
            return Err(MeshHaloError::Config(format!(
                "rank {rank}: local-to-global map not strictly ascending ({} then {})",
                pair[0], pair[1]
            )));
        }
        let global_to_local = GlobalToLocal::from_sorted(&local_to_global);
        Ok(Self {
            rank,
            elements,
            face_tags,
            local_to_global,
            global_to_local,
            coords,
            field,
        })
    }

    pub fn rank(&self) -> PartitionId {
        self.rank
    }

    /// `ne_w`
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// `nn_w`
    pub fn num_nodes(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn elements(&self) -> &[[u32; NODES_PER_ELEMENT]] {
        &self.elements
    }

    pub fn face_tags(&self) -> &[[i32; FACES_PER_ELEMENT]] {
        &self.face_tags
    }

    /// Sorted ascending by construction.
    pub fn local_to_global(&self) -> &[u32] {
        &self.local_to_global
    }

    pub fn global_to_local(&self) -> &GlobalToLocal {
        &self.global_to_local
    }

    pub fn global_id(&self, local: u32) -> u32 {
        self.local_to_global[local as usize]
    }

    pub fn local_id(&self, global: u32) -> Option<u32> {
        self.global_to_local.get(global)
    }

    /// Element connectivity translated back to global ids.
    pub fn element_global(&self, e: usize) -> [u32; NODES_PER_ELEMENT] {
        self.elements[e].map(|l| self.local_to_global[l as usize])
    }

    pub fn coords(&self) -> &[[f64; SPACE_DIM]] {
        &self.coords
    }

    pub fn field(&self) -> &[f64] {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut [f64] {
        &mut self.field
    }
}

/// Sorted, deduplicated global ids referenced by a connectivity slice.
pub fn referenced_nodes(conn_global: &[[u32; NODES_PER_ELEMENT]]) -> Vec<u32> {
    let mut flat: Vec<u32> = conn_global.iter().flatten().copied().collect();
    flat.sort_unstable();
    flat.dedup();
    flat
}

/// Value-typed storage of every worker's mesh, indexed by worker id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshArena {
    meshes: Vec<LocalMesh>,
}

impl MeshArena {
    pub fn new(meshes: Vec<LocalMesh>) -> Self {
        Self { meshes }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn get(&self, worker: PartitionId) -> Option<&LocalMesh> {
        self.meshes.get(worker)
    }

    pub fn get_mut(&mut self, worker: PartitionId) -> Option<&mut LocalMesh> {
        self.meshes.get_mut(worker)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LocalMesh> {
        self.meshes.iter()
    }

    pub fn as_slice(&self) -> &[LocalMesh] {
        &self.meshes
    }

    pub fn into_inner(self) -> Vec<LocalMesh> {
        self.meshes
    }

    /// Sorted union of every worker's global node ids.
    pub fn union_global_ids(&self) -> Vec<u32> {
        self.meshes
            .iter()
            .map(|m| m.local_to_global().iter().copied())
            .kmerge()
            .dedup()
            .collect()
    }

    /// Workers holding global node `g`, ascending.
    pub fn owners_of(&self, g: u32) -> Vec<PartitionId> {
        self.meshes
            .iter()
            .filter(|m| m.global_to_local().contains(g))
            .map(LocalMesh::rank)
            .collect()
    }
}

impl std::ops::Index<PartitionId> for MeshArena {
    type Output = LocalMesh;

    fn index(&self, worker: PartitionId) -> &LocalMesh {
        &self.meshes[worker]
    }
}
