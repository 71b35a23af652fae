//! Project access - the read interface of a multi-resolution store and the
//! file-backed project that implements it

use crate::compression::{get_compressor, CompressionLevel};
use crate::error::{DownsampleError, Result};
use crate::io::{FileSystemIOManager, IOManager};
use crate::layout::{BlockCoord, ProjectLayout};
use crate::metadata::{FormatVersion, ProjectMetadata, METADATA_FILE};
use crate::types::{DataType, Extent3, SliceOffset};
use crate::utils::{brick_path, calculate_checksum};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Read capability of a multi-resolution volume store.
///
/// Levels are indexed into [`resolution_map`](ProjectReader::resolution_map),
/// coarsest first. Voxel buffers are z-major with channels interleaved and
/// little-endian samples.
#[async_trait]
pub trait ProjectReader: Send + Sync {
    /// Project name, normally the file stem
    fn name(&self) -> &str;

    fn block_size(&self) -> Extent3;

    /// Block count per level, coarsest first
    fn resolution_map(&self) -> &[u64];

    fn data_type(&self) -> DataType;

    fn channel_count(&self) -> u32;

    fn timepoint_count(&self) -> u32;

    /// Read the `shape` region at `offset` of `level` into one buffer.
    async fn get_custom_block(
        &self,
        timepoint: u32,
        level: usize,
        offset: SliceOffset,
        shape: Extent3,
    ) -> Result<Bytes>;
}

/// On-disk brick: checksum of the raw voxels plus the compressed payload
#[derive(Debug, Serialize, Deserialize)]
struct BrickRecord {
    checksum: u32,
    raw_len: u64,
    payload: Vec<u8>,
}

type BrickData = Option<Arc<Vec<u8>>>;

/// Decoded bricks of one z row of the block grid
struct BrickLayer {
    timepoint: u32,
    level: usize,
    block_z: u64,
    bricks: HashMap<BlockCoord, BrickData>,
}

/// A project directory: `project.json` plus compressed bricks
pub struct ProjectAccess {
    path: PathBuf,

    metadata: ProjectMetadata,

    io_manager: Arc<dyn IOManager>,

    /// Slab reads walk z in order, so every brick is reused `block_size.z` times
    layer_cache: Mutex<Option<BrickLayer>>,
}

impl ProjectAccess {
    /// Whether `path` holds a readable project
    pub async fn is_project(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        tokio::fs::metadata(path.join(METADATA_FILE))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Open an existing project
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !Self::is_project(&path).await {
            return Err(DownsampleError::InvalidProjectPath(path));
        }

        let io_manager: Arc<dyn IOManager> = Arc::new(FileSystemIOManager::new(&path));
        let metadata_bytes = io_manager.read(METADATA_FILE).await?;
        let metadata: ProjectMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|e| DownsampleError::Metadata(e.to_string()))?;

        if !metadata.version.is_compatible(&FormatVersion::CURRENT) {
            return Err(DownsampleError::InvalidFormat(format!(
                "unsupported project version {}.{}",
                metadata.version.major, metadata.version.minor
            )));
        }
        metadata.layout.validate()?;

        debug!(path = %path.display(), "opened project: {}", metadata.layout.summary());

        Ok(Self {
            path,
            metadata,
            io_manager,
            layer_cache: Mutex::new(None),
        })
    }

    /// Create a new, empty project at `path`
    pub async fn create(path: impl AsRef<Path>, metadata: ProjectMetadata) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if Self::is_project(&path).await {
            return Err(DownsampleError::AlreadyExists(path));
        }
        metadata.layout.validate()?;

        let io_manager: Arc<dyn IOManager> = Arc::new(FileSystemIOManager::new(&path));
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| DownsampleError::Metadata(e.to_string()))?;
        io_manager.write(METADATA_FILE, &metadata_json).await?;

        debug!(path = %path.display(), "created project: {}", metadata.layout.summary());

        Ok(Self {
            path,
            metadata,
            io_manager,
            layer_cache: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.metadata.layout
    }

    fn check_timepoint(&self, timepoint: u32) -> Result<()> {
        let count = self.layout().timepoint_count;
        if timepoint >= count {
            return Err(DownsampleError::OutOfBounds(format!(
                "timepoint {} (project has {})",
                timepoint, count
            )));
        }
        Ok(())
    }

    /// Store one block of raw voxels
    pub async fn write_block(
        &self,
        timepoint: u32,
        level: usize,
        coord: BlockCoord,
        data: &[u8],
    ) -> Result<()> {
        self.check_timepoint(timepoint)?;
        let layout = self.layout();
        let index = layout.block_index(level, coord)?;
        let expected = layout.block_bytes()?;
        if data.len() != expected {
            return Err(DownsampleError::InvalidDimensions(format!(
                "block data is {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        let compressor = get_compressor(self.metadata.compression);
        let record = BrickRecord {
            checksum: calculate_checksum(data),
            raw_len: data.len() as u64,
            payload: compressor.compress(data, CompressionLevel::default())?,
        };
        let encoded = bincode::serialize(&record)?;
        self.io_manager
            .write(&brick_path(timepoint, level, index), &encoded)
            .await
    }

    /// Load one block of raw voxels, `None` when the block was never stored
    pub async fn read_block(
        &self,
        timepoint: u32,
        level: usize,
        coord: BlockCoord,
    ) -> Result<Option<Vec<u8>>> {
        self.check_timepoint(timepoint)?;
        let layout = self.layout();
        let path = brick_path(timepoint, level, layout.block_index(level, coord)?);

        let Some(encoded) = self.io_manager.read_optional(&path).await? else {
            return Ok(None);
        };
        let record: BrickRecord = bincode::deserialize(&encoded)?;

        let expected = layout.block_bytes()?;
        if record.raw_len != expected as u64 {
            return Err(DownsampleError::InvalidFormat(format!(
                "{} holds {} bytes, expected {}",
                path, record.raw_len, expected
            )));
        }

        let raw = get_compressor(self.metadata.compression)
            .decompress(&record.payload, Some(expected))?;
        if raw.len() != expected {
            return Err(DownsampleError::Decompression(format!(
                "{} decoded to {} bytes, expected {}",
                path,
                raw.len(),
                expected
            )));
        }

        let actual = calculate_checksum(&raw);
        if actual != record.checksum {
            return Err(DownsampleError::ChecksumMismatch {
                path,
                expected: record.checksum,
                actual,
            });
        }

        Ok(Some(raw))
    }

    /// Bricks for `coords`, all in block row `block_z`, served from the layer
    /// cache where possible
    async fn layer_bricks(
        &self,
        timepoint: u32,
        level: usize,
        block_z: u64,
        coords: &[BlockCoord],
    ) -> Result<HashMap<BlockCoord, BrickData>> {
        let missing: Vec<BlockCoord> = {
            let mut cache = self.layer_cache.lock();
            let stale = !matches!(
                cache.as_ref(),
                Some(layer) if layer.timepoint == timepoint
                    && layer.level == level
                    && layer.block_z == block_z
            );
            if stale {
                *cache = Some(BrickLayer {
                    timepoint,
                    level,
                    block_z,
                    bricks: HashMap::new(),
                });
            }
            let bricks = cache.as_ref().map(|layer| &layer.bricks);
            coords
                .iter()
                .filter(|coord| !bricks.is_some_and(|b| b.contains_key(*coord)))
                .copied()
                .collect()
        };

        if !missing.is_empty() {
            debug!(timepoint, level, block_z, count = missing.len(), "loading bricks");
        }

        let loaded = try_join_all(missing.into_iter().map(|coord| async move {
            let data = self.read_block(timepoint, level, coord).await?;
            Ok::<_, DownsampleError>((coord, data.map(Arc::new)))
        }))
        .await?;

        let mut cache = self.layer_cache.lock();
        let mut result = HashMap::with_capacity(coords.len());
        if let Some(layer) = cache.as_mut() {
            layer.bricks.extend(loaded.iter().cloned());
            for coord in coords {
                if let Some(data) = layer.bricks.get(coord) {
                    result.insert(*coord, data.clone());
                }
            }
        }
        // Another reader may have switched the layer meanwhile
        for (coord, data) in loaded {
            result.entry(coord).or_insert(data);
        }
        Ok(result)
    }
}

/// Copy the part of one brick that overlaps the requested region
fn copy_brick_region(
    out: &mut [u8],
    brick: &[u8],
    brick_origin: SliceOffset,
    block: Extent3,
    offset: SliceOffset,
    shape: Extent3,
    bytes_per_voxel: usize,
) {
    let lo = |o: u64, b: u64| o.max(b);
    let z0 = lo(offset.z, brick_origin.z);
    let y0 = lo(offset.y, brick_origin.y);
    let x0 = lo(offset.x, brick_origin.x);
    let z1 = (offset.z + shape.z).min(brick_origin.z + block.z);
    let y1 = (offset.y + shape.y).min(brick_origin.y + block.y);
    let x1 = (offset.x + shape.x).min(brick_origin.x + block.x);
    if z0 >= z1 || y0 >= y1 || x0 >= x1 {
        return;
    }

    let run = (x1 - x0) as usize * bytes_per_voxel;
    for z in z0..z1 {
        for y in y0..y1 {
            let src = ((((z - brick_origin.z) * block.y + (y - brick_origin.y)) * block.x)
                + (x0 - brick_origin.x)) as usize
                * bytes_per_voxel;
            let dst = ((((z - offset.z) * shape.y + (y - offset.y)) * shape.x) + (x0 - offset.x))
                as usize
                * bytes_per_voxel;
            out[dst..dst + run].copy_from_slice(&brick[src..src + run]);
        }
    }
}

#[async_trait]
impl ProjectReader for ProjectAccess {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn block_size(&self) -> Extent3 {
        self.layout().block_size
    }

    fn resolution_map(&self) -> &[u64] {
        &self.layout().resolution_map
    }

    fn data_type(&self) -> DataType {
        self.layout().data_type
    }

    fn channel_count(&self) -> u32 {
        self.layout().channel_count
    }

    fn timepoint_count(&self) -> u32 {
        self.layout().timepoint_count
    }

    async fn get_custom_block(
        &self,
        timepoint: u32,
        level: usize,
        offset: SliceOffset,
        shape: Extent3,
    ) -> Result<Bytes> {
        self.check_timepoint(timepoint)?;
        let layout = self.layout();
        layout.check_region(level, &offset, &shape)?;

        let bytes_per_voxel = layout.bytes_per_voxel();
        let out_len = shape
            .voxel_count()
            .and_then(|v| usize::try_from(v).ok())
            .and_then(|v| v.checked_mul(bytes_per_voxel))
            .ok_or_else(|| {
                DownsampleError::InvalidDimensions(format!("region {} is too large", shape))
            })?;
        let mut out = vec![0u8; out_len];

        let (first, last) = layout.blocks_overlapping(&offset, &shape);
        for block_z in first[0]..=last[0] {
            let coords: Vec<BlockCoord> = (first[1]..=last[1])
                .flat_map(|by| (first[2]..=last[2]).map(move |bx| [block_z, by, bx]))
                .collect();
            let bricks = self
                .layer_bricks(timepoint, level, block_z, &coords)
                .await?;

            for coord in &coords {
                // Unstored bricks are background
                if let Some(Some(brick)) = bricks.get(coord) {
                    copy_brick_region(
                        &mut out,
                        brick,
                        layout.block_origin(*coord),
                        layout.block_size,
                        offset,
                        shape,
                        bytes_per_voxel,
                    );
                }
            }
        }

        Ok(Bytes::from(out))
    }
}
