//! Resolution catalog - the stored levels of a project as downsampling options
//!
//! Levels follow the store's convention: index 0 of the resolution map is the
//! coarsest level and the last index is the finest, which is the project's
//! current resolution. Option `i` (1-based) refers to stored level `i - 1`;
//! the current level is listed but never selectable.

use crate::access::ProjectReader;
use crate::error::{DownsampleError, Result};
use crate::types::{DataType, Extent3};
use crate::utils::{exact_cube_root, format_bytes};

/// Bytes stored per voxel for a sample type and channel count.
///
/// 8-bit types take one byte per channel, 16-bit and half-float two, and
/// everything else four.
pub fn bytes_per_voxel(data_type: DataType, channel_count: u32) -> u64 {
    let per_channel = match data_type {
        DataType::U8 => 1,
        DataType::U16 | DataType::F16 => 2,
        _ => 4,
    };
    per_channel * channel_count as u64
}

/// One stored resolution level with its derived size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionLevel {
    /// 1-based option number
    pub index: usize,

    /// Index into the resolution map
    pub level: usize,

    pub block_count: u64,

    pub blocks_per_axis: u64,

    /// Voxel extent, `(z, y, x)`
    pub dimensions: Extent3,

    pub bytes_per_voxel: u64,

    /// `x * y * z * bytes_per_voxel`
    pub estimated_bytes: u64,

    /// The finest level, which the project already is
    pub is_current: bool,
}

impl ResolutionLevel {
    /// Formatted estimated size
    pub fn size_label(&self) -> String {
        format_bytes(self.estimated_bytes)
    }

    /// Option column text: the number, or `Current`
    pub fn option_label(&self) -> String {
        if self.is_current {
            "Current".to_string()
        } else {
            self.index.to_string()
        }
    }
}

/// Display row of the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub option: String,
    /// `[x, y, z]`
    pub resolution: [u64; 3],
    pub data_size: String,
}

/// Every stored level of a project, coarsest first
#[derive(Debug, Clone)]
pub struct ResolutionCatalog {
    levels: Vec<ResolutionLevel>,
}

impl ResolutionCatalog {
    /// Derive the catalog from block metadata.
    pub fn build(
        block_size: Extent3,
        resolution_map: &[u64],
        data_type: DataType,
        channel_count: u32,
    ) -> Result<Self> {
        if resolution_map.is_empty() {
            return Err(DownsampleError::InvalidResolutionData(
                "resolution map is empty".to_string(),
            ));
        }

        let bytes_per_voxel = bytes_per_voxel(data_type, channel_count);
        let finest = resolution_map.len().saturating_sub(1);

        let levels = resolution_map
            .iter()
            .enumerate()
            .map(|(level, &block_count)| {
                let blocks_per_axis = exact_cube_root(block_count)
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        DownsampleError::InvalidResolutionData(format!(
                            "level {} has {} blocks, which is not a non-empty cubic grid",
                            level, block_count
                        ))
                    })?;

                let overflow = || {
                    DownsampleError::InvalidResolutionData(format!(
                        "level {} size overflows",
                        level
                    ))
                };
                let dimensions = block_size
                    .checked_mul(&Extent3::cube(blocks_per_axis))
                    .ok_or_else(overflow)?;
                let estimated_bytes = dimensions
                    .voxel_count()
                    .and_then(|voxels| voxels.checked_mul(bytes_per_voxel))
                    .ok_or_else(overflow)?;

                Ok(ResolutionLevel {
                    index: level + 1,
                    level,
                    block_count,
                    blocks_per_axis,
                    dimensions,
                    bytes_per_voxel,
                    estimated_bytes,
                    is_current: level == finest,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { levels })
    }

    /// Build from a project's read interface
    pub fn from_project<P: ProjectReader + ?Sized>(project: &P) -> Result<Self> {
        Self::build(
            project.block_size(),
            project.resolution_map(),
            project.data_type(),
            project.channel_count(),
        )
    }

    /// Number of stored levels, the current one included
    pub fn resolution_count(&self) -> usize {
        self.levels.len()
    }

    /// All levels, coarsest first
    pub fn levels(&self) -> &[ResolutionLevel] {
        &self.levels
    }

    /// Levels that can be chosen for downsampling
    pub fn options(&self) -> &[ResolutionLevel] {
        match self.levels.split_last() {
            Some((_, options)) => options,
            None => &[],
        }
    }

    /// The finest level
    pub fn current(&self) -> Option<&ResolutionLevel> {
        self.levels.last()
    }

    /// Look up a level by its 1-based option number, current included
    pub fn get(&self, index: usize) -> Option<&ResolutionLevel> {
        index.checked_sub(1).and_then(|i| self.levels.get(i))
    }

    /// Rows for the selection table
    pub fn rows(&self) -> Vec<CatalogRow> {
        self.levels
            .iter()
            .map(|level| CatalogRow {
                option: level.option_label(),
                resolution: level.dimensions.to_xyz(),
                data_size: level.size_label(),
            })
            .collect()
    }
}
