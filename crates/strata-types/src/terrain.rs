//! Terrain height-field patches.

use serde::{Deserialize, Serialize};

use crate::ids::RegionId;

/// Index of a patch within its region's height field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchIndex(pub u32);

impl core::fmt::Display for PatchIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tile of a region's height field.
///
/// The payload is the serialized height data; it is stored and returned
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainPatch {
    /// Owning region.
    pub region_id: RegionId,
    /// Position of the tile in the region grid.
    pub index: PatchIndex,
    /// Incremented on every edit of this tile.
    pub serial: u64,
    /// Serialized height data.
    pub payload: Vec<u8>,
}
