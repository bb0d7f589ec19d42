#![allow(dead_code)]
use mesh_halo::{
    algs::distribute::GlobalMesh,
    config::{DecompConfig, Endian},
    io::{Codec, MeshWriter, mesh_files::MeshInfo},
    partitioning::Permutation,
};
use rand::{Rng, SeedableRng, rngs::SmallRng, seq::SliceRandom};
use std::fs;
use std::path::{Path, PathBuf};

/// Fresh, empty scratch directory for one test.
pub fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("mesh-halo-tests")
        .join(format!("{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A small global mesh held in memory, written to disk on demand.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub coords: Vec<[f64; 2]>,
    pub elements: Vec<[u32; 3]>,
    pub tags: Vec<[i32; 3]>,
    pub field: Option<Vec<f64>>,
}

impl Fixture {
    pub fn ne(&self) -> usize {
        self.elements.len()
    }

    pub fn nn(&self) -> usize {
        self.coords.len()
    }

    pub fn global(&self, initial: f64) -> GlobalMesh {
        GlobalMesh::new(
            self.coords.clone(),
            self.elements.clone(),
            self.tags.clone(),
            self.field.clone(),
            initial,
        )
        .unwrap()
    }

    /// Write every global file (plus both permutations) into `dir`.
    pub fn write(&self, dir: &Path, eperm: &Permutation, nperm: &Permutation, endian: Endian) {
        let parts = eperm.counts().len();
        let names = Default::default();
        let w = MeshWriter::create(dir, &names, parts, Codec::new(endian)).unwrap();
        w.info(MeshInfo {
            ne: self.ne(),
            nn: self.nn(),
        })
        .unwrap();
        w.coords(&self.coords).unwrap();
        w.connectivity(&self.elements).unwrap();
        w.face_tags(&self.tags).unwrap();
        if let Some(field) = &self.field {
            w.field(field).unwrap();
        }
        w.element_permutation(eperm).unwrap();
        w.node_permutation(nperm).unwrap();
    }
}

/// `ne=2`, `nn=4`: elements `[0,1,2]` and `[1,2,3]`.
pub fn two_triangles() -> Fixture {
    Fixture {
        coords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
        elements: vec![[0, 1, 2], [1, 2, 3]],
        tags: vec![[1, 0, 4], [0, 2, 3]],
        field: None,
    }
}

/// Structured `nx` by `ny` cells, two triangles per cell.
pub fn grid(nx: usize, ny: usize, with_field: bool) -> Fixture {
    let id = |i: usize, j: usize| (j * (nx + 1) + i) as u32;
    let mut coords = Vec::new();
    for j in 0..=ny {
        for i in 0..=nx {
            coords.push([i as f64 * 0.5, j as f64 * 0.25]);
        }
    }
    let mut elements = Vec::new();
    let mut tags = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (id(i, j), id(i + 1, j), id(i, j + 1), id(i + 1, j + 1));
            elements.push([a, b, d]);
            elements.push([a, d, c]);
            let bottom = i32::from(j == 0);
            let top = i32::from(j + 1 == ny) * 3;
            tags.push([bottom, 0, 2 * i32::from(i + 1 == nx)]);
            tags.push([0, top, 4 * i32::from(i == 0)]);
        }
    }
    let field = with_field.then(|| (0..coords.len()).map(|g| g as f64 * 1.5).collect());
    Fixture {
        coords,
        elements,
        tags,
        field,
    }
}

/// Permutation that groups entities by `part_of`, keeping (or shuffling)
/// the order inside each part.
pub fn permutation_from_parts(
    part_of: &[usize],
    parts: usize,
    rng: Option<&mut SmallRng>,
) -> Permutation {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); parts];
    for (e, &p) in part_of.iter().enumerate() {
        members[p].push(e);
    }
    if let Some(rng) = rng {
        for m in &mut members {
            m.shuffle(rng);
        }
    }
    let mut dest = vec![0; part_of.len()];
    let mut next = 0;
    for m in &members {
        for &e in m {
            dest[e] = next;
            next += 1;
        }
    }
    Permutation::new(dest, members.iter().map(Vec::len).collect())
}

/// Contiguous blocks of (nearly) equal size.
pub fn block_parts(n: usize, parts: usize) -> Vec<usize> {
    (0..n).map(|e| e * parts / n.max(1)).collect()
}

/// Random element and node permutations for `fx` over `parts` workers.
pub fn random_permutations(fx: &Fixture, parts: usize, seed: u64) -> (Permutation, Permutation) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let epart: Vec<usize> = (0..fx.ne()).map(|_| rng.gen_range(0..parts)).collect();
    let npart: Vec<usize> = (0..fx.nn()).map(|_| rng.gen_range(0..parts)).collect();
    let eperm = permutation_from_parts(&epart, parts, Some(&mut rng));
    let nperm = permutation_from_parts(&npart, parts, Some(&mut rng));
    (eperm, nperm)
}

pub fn config(mesh_dir: &Path, output_dir: &Path, parts: usize, endian: Endian) -> DecompConfig {
    DecompConfig {
        mesh_dir: mesh_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        num_workers: parts,
        endian,
        initial_value: 0.0,
        comm_deadline_ms: Some(20_000),
        ..Default::default()
    }
}

/// Every file under `dir`, relative path → bytes, sorted by path.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap().to_path_buf();
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
