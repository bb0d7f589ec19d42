//! Worker-local mesh topology.

pub mod local_mesh;

pub use local_mesh::{
    FACES_PER_ELEMENT, GlobalToLocal, LocalMesh, MeshArena, NODES_PER_ELEMENT, NodeData,
    SPACE_DIM, referenced_nodes,
};
