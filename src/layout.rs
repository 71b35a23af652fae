//! Project layout - how a volume is divided into blocks across resolution levels
//!
//! Every level is a cubic grid of `n x n x n` blocks. The resolution map
//! records the total block count `n³` per level, ordered coarsest first, so
//! the last entry is the finest level the project was built from.

use crate::error::{DownsampleError, Result};
use crate::types::{DataType, Extent3, SliceOffset};
use crate::utils::{exact_cube_root, format_bytes};
use serde::{Deserialize, Serialize};

/// Block edge used when none is configured
pub const DEFAULT_BLOCK_EDGE: u64 = 64;

/// Block grid coordinate `[z, y, x]`
pub type BlockCoord = [u64; 3];

/// Layout of a project's voxel data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayout {
    /// Sample type of each channel
    pub data_type: DataType,

    /// Interleaved channels per voxel
    pub channel_count: u32,

    /// Number of stored timepoints
    pub timepoint_count: u32,

    /// Voxels per block along each axis
    pub block_size: Extent3,

    /// Total block count per level, coarsest first
    pub resolution_map: Vec<u64>,

    /// Extent of the source volume before padding to whole blocks
    pub volume: Extent3,
}

impl ProjectLayout {
    /// Create a layout from stored metadata, validating every level.
    pub fn new(
        data_type: DataType,
        channel_count: u32,
        block_size: Extent3,
        resolution_map: Vec<u64>,
    ) -> Result<Self> {
        let mut layout = Self {
            data_type,
            channel_count,
            timepoint_count: 1,
            block_size,
            resolution_map,
            volume: Extent3::default(),
        };
        layout.validate()?;
        layout.volume = layout.level_extent(layout.finest_level())?;
        Ok(layout)
    }

    /// Build the pyramid layout for a volume of `volume` voxels.
    ///
    /// The finest grid edge is the largest per-axis block count; each coarser
    /// level halves the edge (rounding up) until a single block remains.
    pub fn for_volume(
        volume: Extent3,
        data_type: DataType,
        channel_count: u32,
        block_size: Extent3,
    ) -> Result<Self> {
        if volume.is_empty() {
            return Err(DownsampleError::InvalidDimensions(format!(
                "volume {} has an empty axis",
                volume
            )));
        }
        if block_size.is_empty() {
            return Err(DownsampleError::InvalidDimensions(format!(
                "block size {} has an empty axis",
                block_size
            )));
        }

        let mut edge = [
            volume.z.div_ceil(block_size.z),
            volume.y.div_ceil(block_size.y),
            volume.x.div_ceil(block_size.x),
        ]
        .into_iter()
        .max()
        .unwrap_or(1);

        let mut resolution_map = Vec::new();
        loop {
            let count = edge.checked_pow(3).ok_or_else(|| {
                DownsampleError::InvalidDimensions(format!("volume {} is too large", volume))
            })?;
            resolution_map.push(count);
            if edge <= 1 {
                break;
            }
            edge = edge.div_ceil(2);
        }
        resolution_map.reverse();

        let mut layout = Self::new(data_type, channel_count, block_size, resolution_map)?;
        layout.volume = volume;
        Ok(layout)
    }

    /// Set the number of timepoints
    pub fn with_timepoints(mut self, timepoint_count: u32) -> Self {
        self.timepoint_count = timepoint_count;
        self
    }

    /// Check the invariants stored metadata must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 {
            return Err(DownsampleError::InvalidResolutionData(
                "channel count must be at least 1".to_string(),
            ));
        }
        if self.block_size.is_empty() {
            return Err(DownsampleError::InvalidResolutionData(format!(
                "block size {} has an empty axis",
                self.block_size
            )));
        }
        if self.resolution_map.is_empty() {
            return Err(DownsampleError::InvalidResolutionData(
                "resolution map is empty".to_string(),
            ));
        }
        for level in 0..self.level_count() {
            self.level_extent(level)?;
        }
        Ok(())
    }

    pub fn level_count(&self) -> usize {
        self.resolution_map.len()
    }

    /// Index of the finest stored level
    pub fn finest_level(&self) -> usize {
        self.resolution_map.len().saturating_sub(1)
    }

    /// Blocks along each axis of `level`
    pub fn blocks_per_axis(&self, level: usize) -> Result<u64> {
        let count = *self.resolution_map.get(level).ok_or_else(|| {
            DownsampleError::OutOfBounds(format!(
                "level {} (project has {} levels)",
                level,
                self.level_count()
            ))
        })?;

        match exact_cube_root(count) {
            Some(edge) if edge > 0 => Ok(edge),
            _ => Err(DownsampleError::InvalidResolutionData(format!(
                "level {} has {} blocks, which is not a non-empty cubic grid",
                level, count
            ))),
        }
    }

    /// Voxel extent of `level`, including padding to whole blocks
    pub fn level_extent(&self, level: usize) -> Result<Extent3> {
        let edge = self.blocks_per_axis(level)?;
        self.block_size.checked_mul(&Extent3::cube(edge)).ok_or_else(|| {
            DownsampleError::InvalidResolutionData(format!("level {} extent overflows", level))
        })
    }

    /// Bytes of one voxel, all channels included
    pub fn bytes_per_voxel(&self) -> usize {
        self.data_type.size_in_bytes() * self.channel_count as usize
    }

    /// Uncompressed bytes of one block
    pub fn block_bytes(&self) -> Result<usize> {
        self.block_size
            .voxel_count()
            .and_then(|v| usize::try_from(v).ok())
            .and_then(|v| v.checked_mul(self.bytes_per_voxel()))
            .ok_or_else(|| {
                DownsampleError::InvalidDimensions(format!(
                    "block size {} is too large",
                    self.block_size
                ))
            })
    }

    /// Linear z-major brick index of a block coordinate
    pub fn block_index(&self, level: usize, coord: BlockCoord) -> Result<u64> {
        let edge = self.blocks_per_axis(level)?;
        if coord.iter().any(|&c| c >= edge) {
            return Err(DownsampleError::OutOfBounds(format!(
                "block {:?} outside the {}³ grid of level {}",
                coord, edge, level
            )));
        }
        Ok((coord[0] * edge + coord[1]) * edge + coord[2])
    }

    /// Voxel offset of a block's lower corner
    pub fn block_origin(&self, coord: BlockCoord) -> SliceOffset {
        SliceOffset::new(
            coord[0] * self.block_size.z,
            coord[1] * self.block_size.y,
            coord[2] * self.block_size.x,
        )
    }

    /// Inclusive range of block coordinates overlapping a voxel region
    pub fn blocks_overlapping(
        &self,
        offset: &SliceOffset,
        shape: &Extent3,
    ) -> (BlockCoord, BlockCoord) {
        let first = [
            offset.z / self.block_size.z,
            offset.y / self.block_size.y,
            offset.x / self.block_size.x,
        ];
        let last = [
            (offset.z + shape.z - 1) / self.block_size.z,
            (offset.y + shape.y - 1) / self.block_size.y,
            (offset.x + shape.x - 1) / self.block_size.x,
        ];
        (first, last)
    }

    /// Reject empty regions and regions reaching outside `level`
    pub fn check_region(&self, level: usize, offset: &SliceOffset, shape: &Extent3) -> Result<()> {
        let extent = self.level_extent(level)?;
        if shape.is_empty() {
            return Err(DownsampleError::InvalidDimensions(format!(
                "region shape {} is empty",
                shape
            )));
        }

        let end = offset.end(shape).ok_or_else(|| {
            DownsampleError::OutOfBounds(format!("region at {} overflows", offset))
        })?;
        if end.z > extent.z || end.y > extent.y || end.x > extent.x {
            return Err(DownsampleError::OutOfBounds(format!(
                "region {} at {} exceeds level {} extent {}",
                shape, offset, level, extent
            )));
        }
        Ok(())
    }

    /// Get a summary string of the layout
    pub fn summary(&self) -> String {
        let finest = self
            .level_extent(self.finest_level())
            .map(|e| e.to_string())
            .unwrap_or_else(|_| "?".to_string());
        let bytes = self
            .volume
            .voxel_count()
            .and_then(|v| v.checked_mul(self.bytes_per_voxel() as u64))
            .map(format_bytes)
            .unwrap_or_else(|| "?".to_string());

        format!(
            "{} volume ({} padded), {} x {}ch, {} levels, blocks {}, {}",
            self.volume,
            finest,
            self.data_type,
            self.channel_count,
            self.level_count(),
            self.block_size,
            bytes
        )
    }
}
