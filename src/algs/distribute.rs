//! Pre-partition mode: a single controller loads the global mesh, splits it
//! by the element permutation and writes one self-contained file tree per
//! worker.

use crate::config::DecompConfig;
use crate::io::binary::Codec;
use crate::io::mesh_files::{MeshInfo, MeshReader};
use crate::io::partitioned::write_worker_tree;
use crate::mesh_error::MeshHaloError;
use crate::overlap::BoundaryRegistry;
use crate::partitioning::{PartitionId, Permutation};
use crate::topology::{
    FACES_PER_ELEMENT, LocalMesh, MeshArena, NODES_PER_ELEMENT, NodeData, SPACE_DIM,
    referenced_nodes,
};
use std::path::PathBuf;

/// The undivided mesh, held only by the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalMesh {
    coords: Vec<[f64; SPACE_DIM]>,
    elements: Vec<[u32; NODES_PER_ELEMENT]>,
    face_tags: Vec<[i32; FACES_PER_ELEMENT]>,
    field: Vec<f64>,
    has_field: bool,
}

impl GlobalMesh {
    /// Assemble and validate a global mesh. Without `field`, every node
    /// starts at `initial_value`. Every node must belong to some element.
    pub fn new(
        coords: Vec<[f64; SPACE_DIM]>,
        elements: Vec<[u32; NODES_PER_ELEMENT]>,
        face_tags: Vec<[i32; FACES_PER_ELEMENT]>,
        field: Option<Vec<f64>>,
        initial_value: f64,
    ) -> Result<Self, MeshHaloError> {
        let nn = coords.len();
        if face_tags.len() != elements.len() {
            return Err(MeshHaloError::Config(format!(
                "{} elements but {} face-tag records",
                elements.len(),
                face_tags.len()
            )));
        }
        if let Some(&bad) = elements.as_flattened().iter().find(|&&g| g as usize >= nn) {
            return Err(MeshHaloError::IndexOutOfRange {
                what: "node",
                index: i64::from(bad),
                bound: nn,
            });
        }
        let used = referenced_nodes(&elements);
        if used.len() != nn {
            // sorted and in range, so the first gap is the first orphan
            let orphan = used
                .iter()
                .zip(0u32..)
                .find(|(g, i)| **g != *i)
                .map_or(used.len(), |(_, i)| i as usize);
            return Err(MeshHaloError::Config(format!(
                "node {orphan} is referenced by no element"
            )));
        }
        let has_field = field.is_some();
        let field = field.unwrap_or_else(|| vec![initial_value; nn]);
        if field.len() != nn {
            return Err(MeshHaloError::Config(format!(
                "{nn} nodes but {} initial field values",
                field.len()
            )));
        }
        Ok(Self {
            coords,
            elements,
            face_tags,
            field,
            has_field,
        })
    }

    /// Read every global file through `reader`.
    pub fn load(reader: &MeshReader, initial_value: f64) -> Result<Self, MeshHaloError> {
        let MeshInfo { ne, nn } = reader.info()?;
        let coords = reader.coords(0..nn)?;
        let elements = reader.connectivity(0..ne, nn)?;
        let face_tags = reader.face_tags(0..ne)?;
        let field = if reader.has_field() {
            Some(reader.field(0..nn, initial_value)?)
        } else {
            log::warn!(
                "no initial field at {}, using {initial_value} everywhere",
                reader.paths().data.display()
            );
            None
        };
        log::info!("loaded global mesh: {ne} elements, {nn} nodes");
        Self::new(coords, elements, face_tags, field, initial_value)
    }

    pub fn ne(&self) -> usize {
        self.elements.len()
    }

    pub fn nn(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[[f64; SPACE_DIM]] {
        &self.coords
    }

    pub fn elements(&self) -> &[[u32; NODES_PER_ELEMENT]] {
        &self.elements
    }

    pub fn face_tags(&self) -> &[[i32; FACES_PER_ELEMENT]] {
        &self.face_tags
    }

    pub fn field(&self) -> &[f64] {
        &self.field
    }

    /// Whether the initial field came from a `data` file.
    pub fn has_field(&self) -> bool {
        self.has_field
    }

    fn node(&self, g: u32) -> Result<NodeData, MeshHaloError> {
        let i = g as usize;
        match (self.coords.get(i), self.field.get(i)) {
            (Some(&coord), Some(&value)) => Ok(NodeData { coord, value }),
            _ => Err(MeshHaloError::IndexOutOfRange {
                what: "node",
                index: i64::from(g),
                bound: self.nn(),
            }),
        }
    }
}

/// Split `global` into one [`LocalMesh`] per partition of `perm`.
///
/// Worker `w` receives the elements whose destination index falls in its
/// range, in destination order.
pub fn decompose(global: &GlobalMesh, perm: &Permutation) -> Result<MeshArena, MeshHaloError> {
    if perm.len() != global.ne() {
        return Err(MeshHaloError::Config(format!(
            "element permutation covers {} elements, mesh has {}",
            perm.len(),
            global.ne()
        )));
    }
    let planner = perm.planner("element")?;
    let by_dest = perm.validate()?;

    let one = |w: PartitionId| -> Result<LocalMesh, MeshHaloError> {
        let ids = &by_dest[planner.range(w)];
        let conn: Vec<_> = ids.iter().map(|&e| global.elements[e]).collect();
        let tags = ids.iter().map(|&e| global.face_tags[e]).collect();
        let mesh = LocalMesh::from_global_elements(w, &conn, tags, |g| global.node(g))?;
        log::debug!(
            "rank {w}: {} elements, {} nodes",
            mesh.num_elements(),
            mesh.num_nodes()
        );
        Ok(mesh)
    };

    #[cfg(feature = "rayon")]
    let meshes = {
        use rayon::prelude::*;
        (0..planner.num_parts())
            .into_par_iter()
            .map(one)
            .collect::<Result<Vec<_>, _>>()?
    };
    #[cfg(not(feature = "rayon"))]
    let meshes = (0..planner.num_parts())
        .map(one)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MeshArena::new(meshes))
}

/// What [`decompose_to_disk`] wrote for one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rank: PartitionId,
    pub ne: usize,
    pub nn: usize,
    pub shared: usize,
    pub dir: PathBuf,
}

/// Load, decompose, discover boundaries and write `proc_<rank>/` trees under
/// `cfg.output_dir`.
pub fn decompose_to_disk(cfg: &DecompConfig) -> Result<Vec<WorkerSummary>, MeshHaloError> {
    cfg.validate()?;
    let reader = MeshReader::from_config(cfg);
    let global = GlobalMesh::load(&reader, cfg.initial_value)?;
    let perm = reader.element_permutation(global.ne(), cfg.num_workers)?;
    let arena = decompose(&global, &perm)?;
    let registry = BoundaryRegistry::build(&arena)?;

    let codec = Codec::new(cfg.endian);
    arena
        .iter()
        .zip(registry.workers())
        .map(|(mesh, boundary)| {
            let dir = write_worker_tree(
                &cfg.output_dir,
                &cfg.files,
                codec,
                cfg.num_workers,
                mesh,
                boundary,
                global.has_field(),
            )?;
            Ok(WorkerSummary {
                rank: mesh.rank(),
                ne: mesh.num_elements(),
                nn: mesh.num_nodes(),
                shared: boundary.num_shared(),
                dir,
            })
        })
        .collect()
}
