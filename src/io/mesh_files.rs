//! The global mesh file set: `minf`, `mxyz`, `mien`, `mrng`, `data` and the
//! two permutation files.
//!
//! Connectivity is stored 1-based on disk and handled 0-based in memory;
//! decoding validates every node index against `nn`. All binary readers come
//! in a whole-array and a record-range flavour so a worker can read only its
//! own slice.

use crate::config::{DecompConfig, MeshFileNames};
use crate::io::binary::Codec;
use crate::mesh_error::MeshHaloError;
use crate::partitioning::Permutation;
use crate::topology::{FACES_PER_ELEMENT, NODES_PER_ELEMENT, SPACE_DIM};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Contents of the text `minf` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshInfo {
    pub ne: usize,
    pub nn: usize,
}

impl MeshInfo {
    /// Parse `ne <int>` / `nn <int>` pairs; both keys are required.
    pub fn parse(path: &Path, text: &str) -> Result<Self, MeshHaloError> {
        let malformed = |line: &str| MeshHaloError::MalformedInfo {
            path: path.to_path_buf(),
            line: line.to_string(),
        };
        let mut ne = None;
        let mut nn = None;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(malformed(line));
            };
            // ids travel as u32
            let value: usize = value
                .parse::<u32>()
                .map_err(|_| malformed(line))? as usize;
            match key {
                "ne" => ne = Some(value),
                "nn" => nn = Some(value),
                _ => return Err(malformed(line)),
            }
        }
        match (ne, nn) {
            (Some(ne), Some(nn)) => Ok(Self { ne, nn }),
            (None, _) => Err(malformed("missing `ne`")),
            (_, None) => Err(malformed("missing `nn`")),
        }
    }

    pub fn read(path: &Path) -> Result<Self, MeshHaloError> {
        let text = fs::read_to_string(path).map_err(|e| MeshHaloError::io(path, e))?;
        Self::parse(path, &text)
    }

    pub fn write(&self, path: &Path) -> Result<(), MeshHaloError> {
        fs::write(path, format!("ne {}\nnn {}\n", self.ne, self.nn))
            .map_err(|e| MeshHaloError::io(path, e))
    }
}

/// Suffix of a permutation file for `parts` workers, e.g. `00004`.
pub fn permutation_suffix(parts: usize) -> String {
    format!("{parts:05}")
}

/// Resolved paths of a mesh file set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshPaths {
    pub minf: PathBuf,
    pub mxyz: PathBuf,
    pub mien: PathBuf,
    pub mrng: PathBuf,
    pub mprm: PathBuf,
    pub nprm: PathBuf,
    pub data: PathBuf,
}

impl MeshPaths {
    pub fn new(dir: &Path, names: &MeshFileNames, parts: usize) -> Self {
        let suffix = permutation_suffix(parts);
        Self {
            minf: dir.join(&names.minf),
            mxyz: dir.join(&names.mxyz),
            mien: dir.join(&names.mien),
            mrng: dir.join(&names.mrng),
            mprm: dir.join(format!("{}.{suffix}", names.mprm)),
            nprm: dir.join(format!("{}.{suffix}", names.nprm)),
            data: dir.join(&names.data),
        }
    }

    /// Global mesh paths for a run configuration.
    pub fn from_config(cfg: &DecompConfig) -> Self {
        Self::new(&cfg.mesh_dir, &cfg.files, cfg.num_workers)
    }
}

fn node_index(raw: i32, nn: usize) -> Result<u32, MeshHaloError> {
    let idx = i64::from(raw) - 1;
    if idx < 0 || idx as usize >= nn {
        return Err(MeshHaloError::IndexOutOfRange {
            what: "node",
            index: idx,
            bound: nn,
        });
    }
    Ok(idx as u32)
}

fn triples<T: Copy>(raw: &[T]) -> Vec<[T; 3]> {
    raw.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

/// Reads a mesh file set, whole or by record range.
#[derive(Clone, Debug)]
pub struct MeshReader {
    paths: MeshPaths,
    codec: Codec,
}

impl MeshReader {
    pub fn new(paths: MeshPaths, codec: Codec) -> Self {
        Self { paths, codec }
    }

    pub fn from_config(cfg: &DecompConfig) -> Self {
        Self::new(MeshPaths::from_config(cfg), Codec::new(cfg.endian))
    }

    pub fn paths(&self) -> &MeshPaths {
        &self.paths
    }

    pub fn info(&self) -> Result<MeshInfo, MeshHaloError> {
        MeshInfo::read(&self.paths.minf)
    }

    /// Node coordinates for global nodes `nodes`.
    pub fn coords(&self, nodes: Range<usize>) -> Result<Vec<[f64; SPACE_DIM]>, MeshHaloError> {
        let raw = self.codec.read_f64_range(
            &self.paths.mxyz,
            nodes.start.saturating_mul(SPACE_DIM),
            nodes.len().saturating_mul(SPACE_DIM),
        )?;
        Ok(raw.chunks_exact(SPACE_DIM).map(|c| [c[0], c[1]]).collect())
    }

    /// 0-based connectivity of global elements `elems`, validated against `nn`.
    pub fn connectivity(
        &self,
        elems: Range<usize>,
        nn: usize,
    ) -> Result<Vec<[u32; NODES_PER_ELEMENT]>, MeshHaloError> {
        let raw = self.codec.read_i32_range(
            &self.paths.mien,
            elems.start.saturating_mul(NODES_PER_ELEMENT),
            elems.len().saturating_mul(NODES_PER_ELEMENT),
        )?;
        let ids = raw
            .iter()
            .map(|&r| node_index(r, nn))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(triples(&ids))
    }

    /// Per-edge boundary tags of global elements `elems`.
    pub fn face_tags(
        &self,
        elems: Range<usize>,
    ) -> Result<Vec<[i32; FACES_PER_ELEMENT]>, MeshHaloError> {
        let raw = self.codec.read_i32_range(
            &self.paths.mrng,
            elems.start.saturating_mul(FACES_PER_ELEMENT),
            elems.len().saturating_mul(FACES_PER_ELEMENT),
        )?;
        Ok(triples(&raw))
    }

    /// Whether the optional initial-field file exists.
    pub fn has_field(&self) -> bool {
        self.paths.data.is_file()
    }

    /// Initial field values for global nodes `nodes`, or `initial` everywhere
    /// when the `data` file is absent.
    pub fn field(&self, nodes: Range<usize>, initial: f64) -> Result<Vec<f64>, MeshHaloError> {
        if !self.has_field() {
            return Ok(vec![initial; nodes.len()]);
        }
        self.codec
            .read_f64_range(&self.paths.data, nodes.start, nodes.len())
    }

    pub fn element_permutation(&self, ne: usize, parts: usize) -> Result<Permutation, MeshHaloError> {
        self.permutation(&self.paths.mprm, "element", ne, parts)
    }

    pub fn node_permutation(&self, nn: usize, parts: usize) -> Result<Permutation, MeshHaloError> {
        self.permutation(&self.paths.nprm, "node", nn, parts)
    }

    fn permutation(
        &self,
        path: &Path,
        what: &'static str,
        total: usize,
        parts: usize,
    ) -> Result<Permutation, MeshHaloError> {
        let raw = self
            .codec
            .read_i32_range(path, 0, total.saturating_add(parts))?;
        Permutation::from_raw(what, &raw, total, parts)
    }
}

/// Writes a mesh file set in the same layouts the reader expects.
#[derive(Clone, Debug)]
pub struct MeshWriter {
    paths: MeshPaths,
    codec: Codec,
}

impl MeshWriter {
    /// Create `dir` if needed.
    pub fn create(
        dir: &Path,
        names: &MeshFileNames,
        parts: usize,
        codec: Codec,
    ) -> Result<Self, MeshHaloError> {
        fs::create_dir_all(dir).map_err(|e| MeshHaloError::io(dir, e))?;
        Ok(Self {
            paths: MeshPaths::new(dir, names, parts),
            codec,
        })
    }

    pub fn paths(&self) -> &MeshPaths {
        &self.paths
    }

    pub fn info(&self, info: MeshInfo) -> Result<(), MeshHaloError> {
        info.write(&self.paths.minf)
    }

    pub fn coords(&self, coords: &[[f64; SPACE_DIM]]) -> Result<(), MeshHaloError> {
        self.codec
            .write_f64s(&self.paths.mxyz, coords.as_flattened())
    }

    /// Write 0-based connectivity as 1-based ints.
    pub fn connectivity(&self, conn: &[[u32; NODES_PER_ELEMENT]]) -> Result<(), MeshHaloError> {
        let raw: Vec<i32> = conn.as_flattened().iter().map(|&n| n as i32 + 1).collect();
        self.codec.write_i32s(&self.paths.mien, &raw)
    }

    pub fn face_tags(&self, tags: &[[i32; FACES_PER_ELEMENT]]) -> Result<(), MeshHaloError> {
        self.codec
            .write_i32s(&self.paths.mrng, tags.as_flattened())
    }

    pub fn field(&self, values: &[f64]) -> Result<(), MeshHaloError> {
        self.codec.write_f64s(&self.paths.data, values)
    }

    pub fn element_permutation(&self, perm: &Permutation) -> Result<(), MeshHaloError> {
        self.codec.write_i32s(&self.paths.mprm, &perm.to_raw())
    }

    pub fn node_permutation(&self, perm: &Permutation) -> Result<(), MeshHaloError> {
        self.codec.write_i32s(&self.paths.nprm, &perm.to_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endian;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mesh-halo-files-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn minf_parses_both_keys() {
        let p = Path::new("minf");
        assert_eq!(
            MeshInfo::parse(p, "ne 2\nnn 4\n").unwrap(),
            MeshInfo { ne: 2, nn: 4 }
        );
        assert_eq!(
            MeshInfo::parse(p, "  nn 7\n\nne 3").unwrap(),
            MeshInfo { ne: 3, nn: 7 }
        );
        assert!(matches!(
            MeshInfo::parse(p, "ne 2\n"),
            Err(MeshHaloError::MalformedInfo { .. })
        ));
        assert!(matches!(
            MeshInfo::parse(p, "ne two\nnn 4"),
            Err(MeshHaloError::MalformedInfo { .. })
        ));
        // counts past the u32 id space
        assert!(matches!(
            MeshInfo::parse(p, "ne 4611686018427387904\nnn 4"),
            Err(MeshHaloError::MalformedInfo { .. })
        ));
    }

    #[test]
    fn permutation_names_are_zero_padded() {
        let paths = MeshPaths::new(Path::new("/m"), &MeshFileNames::default(), 4);
        assert_eq!(paths.mprm, PathBuf::from("/m/mprm.00004"));
        assert_eq!(paths.nprm, PathBuf::from("/m/nprm.00004"));
    }

    #[test]
    fn writer_and_reader_agree() {
        let dir = scratch("agree");
        let names = MeshFileNames::default();
        let codec = Codec::new(Endian::Big);
        let w = MeshWriter::create(&dir, &names, 2, codec).unwrap();
        w.info(MeshInfo { ne: 2, nn: 4 }).unwrap();
        w.coords(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]])
            .unwrap();
        w.connectivity(&[[0, 1, 2], [1, 3, 2]]).unwrap();
        w.face_tags(&[[1, 0, 2], [0, 3, 0]]).unwrap();
        w.element_permutation(&Permutation::identity(vec![1, 1]))
            .unwrap();

        let r = MeshReader::new(MeshPaths::new(&dir, &names, 2), codec);
        let info = r.info().unwrap();
        assert_eq!(r.connectivity(1..2, info.nn).unwrap(), vec![[1, 3, 2]]);
        assert_eq!(r.coords(2..4).unwrap(), vec![[0.0, 1.0], [1.0, 1.0]]);
        assert_eq!(r.face_tags(0..2).unwrap()[1], [0, 3, 0]);
        assert!(!r.has_field());
        assert_eq!(r.field(0..4, 300.0).unwrap(), vec![300.0; 4]);
        let perm = r.element_permutation(2, 2).unwrap();
        assert_eq!(perm.counts(), &[1, 1]);

        // a node id past nn is an index error
        assert!(matches!(
            r.connectivity(0..2, 3),
            Err(MeshHaloError::IndexOutOfRange { index: 3, bound: 3, .. })
        ));
    }
}
