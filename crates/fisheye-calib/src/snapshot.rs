use crate::error::FisheyeError;
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Persisted form of a fisheye model: grid geometry, `K` (row-major) and `D`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub format_version: u32,
    pub nx: usize,
    pub ny: usize,
    pub k: [[f64; 3]; 3],
    pub d: [f64; 4],
}

impl ModelSnapshot {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, FisheyeError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and check the format version.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, FisheyeError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(FisheyeError::UnsupportedSnapshotVersion(snapshot.format_version));
        }
        Ok(snapshot)
    }
}
