//! Run configuration for decomposition and halo exchange.
//!
//! Settings are plain serde structs with defaults for every field, loaded from
//! JSON. Unknown keys are rejected so a typo never silently falls back to a
//! default.

use crate::mesh_error::MeshHaloError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Byte order of the binary mesh files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Big-endian files (the historical producer format).
    #[default]
    Big,
    Little,
    /// Whatever the host uses; no swapping.
    Native,
}

/// How shared-node contributions are summed every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaloStrategy {
    /// P−1 fixed-size steps around a logical ring.
    #[default]
    Ring,
    /// Direct exchange with the ranks discovered by the boundary registry.
    Pairwise,
}

/// File names of the global mesh, relative to [`DecompConfig::mesh_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeshFileNames {
    pub minf: String,
    pub mxyz: String,
    pub mien: String,
    pub mrng: String,
    /// Element permutation prefix; `.<P, 5 digits>` is appended.
    pub mprm: String,
    /// Node permutation prefix; `.<P, 5 digits>` is appended.
    pub nprm: String,
    pub data: String,
}

impl Default for MeshFileNames {
    fn default() -> Self {
        Self {
            minf: "minf".into(),
            mxyz: "mxyz".into(),
            mien: "mien".into(),
            mrng: "mrng".into(),
            mprm: "mprm".into(),
            nprm: "nprm".into(),
            data: "data".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecompConfig {
    /// Directory holding the global mesh files.
    pub mesh_dir: PathBuf,
    /// Directory receiving the `proc_<rank>/` trees.
    pub output_dir: PathBuf,
    pub files: MeshFileNames,
    /// Number of workers P.
    pub num_workers: usize,
    pub endian: Endian,
    /// Field value used when no `data` file exists.
    pub initial_value: f64,
    /// Upper bound on any single blocking wait; `None` waits forever.
    pub comm_deadline_ms: Option<u64>,
    pub halo: HaloStrategy,
}

impl Default for DecompConfig {
    fn default() -> Self {
        Self {
            mesh_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            files: MeshFileNames::default(),
            num_workers: 1,
            endian: Endian::default(),
            initial_value: 0.0,
            comm_deadline_ms: None,
            halo: HaloStrategy::default(),
        }
    }
}

impl DecompConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, MeshHaloError> {
        let cfg: DecompConfig =
            serde_json::from_str(s).map_err(|e| MeshHaloError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON settings file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MeshHaloError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MeshHaloError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), MeshHaloError> {
        if self.num_workers == 0 {
            return Err(MeshHaloError::Config(
                "num_workers must be at least 1".into(),
            ));
        }
        if self.comm_deadline_ms == Some(0) {
            return Err(MeshHaloError::Config(
                "comm_deadline_ms must be positive when set".into(),
            ));
        }
        if !self.initial_value.is_finite() {
            return Err(MeshHaloError::Config(
                "initial_value must be finite".into(),
            ));
        }
        Ok(())
    }

    pub fn comm_deadline(&self) -> Option<Duration> {
        self.comm_deadline_ms.map(Duration::from_millis)
    }
}
