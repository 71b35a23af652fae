//! Brick conversion - builds a new bricked project from a staged slice sequence
//!
//! The sequence is decoded into one padded in-memory volume, which becomes the
//! finest level. Each coarser level takes every second voxel along every axis
//! of the level above it.

use crate::access::ProjectAccess;
use crate::compression::CompressionMethod;
use crate::error::{DownsampleError, Result};
use crate::layout::{ProjectLayout, DEFAULT_BLOCK_EDGE};
use crate::metadata::ProjectMetadata;
use crate::rebuild::{ConversionJob, ImageSequence, ProjectWriter};
use crate::staging::SequenceDescription;
use crate::types::Extent3;
use async_trait::async_trait;
use ndarray::{s, Array4, ArrayView3};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Share of the progress scale spent decoding slices
const DECODE_SHARE: u64 = 50;

/// Highest percentage reported while the task is still running
const RUNNING_CEILING: u8 = 99;

/// Builds bricked projects from slice sequences
#[derive(Debug, Clone, Copy)]
pub struct BrickConverter {
    block_size: Extent3,
    compression: CompressionMethod,
}

impl BrickConverter {
    pub fn new(block_size: Extent3) -> Self {
        Self {
            block_size,
            compression: CompressionMethod::default(),
        }
    }

    /// Set compression method for written bricks
    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    pub fn block_size(&self) -> Extent3 {
        self.block_size
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }
}

impl Default for BrickConverter {
    fn default() -> Self {
        Self::new(Extent3::cube(DEFAULT_BLOCK_EDGE))
    }
}

#[async_trait]
impl ProjectWriter for BrickConverter {
    async fn open_image_sequence(
        &self,
        description: SequenceDescription,
        time_series: bool,
    ) -> Result<ImageSequence> {
        if time_series {
            return Err(DownsampleError::Conversion(
                "time series sequences are not supported".to_string(),
            ));
        }
        if description.files.is_empty() {
            return Err(DownsampleError::EmptyStagingSequence(description.directory));
        }
        Ok(ImageSequence {
            description,
            time_series,
        })
    }

    async fn start_conversion(
        &self,
        sequence: ImageSequence,
        output: &Path,
    ) -> Result<Box<dyn ConversionJob>> {
        let description = sequence.description;
        let layout = ProjectLayout::for_volume(
            description.volume_extent(),
            description.format.data_type,
            description.format.channel_count,
            self.block_size,
        )?;

        let name = output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("project");
        let metadata = ProjectMetadata::new(name, layout).with_compression(self.compression);
        let project = ProjectAccess::create(output, metadata).await?;
        info!(
            output = %output.display(),
            "converting {} slices: {}",
            description.files.len(),
            project.layout().summary()
        );

        let progress = Arc::new(AtomicU8::new(0));
        let handle = tokio::spawn(convert_sequence(
            project,
            Arc::new(description),
            Arc::clone(&progress),
        ));

        Ok(Box::new(BrickConversionJob {
            progress,
            handle: Some(handle),
        }))
    }
}

/// Conversion running on its own task
struct BrickConversionJob {
    progress: Arc<AtomicU8>,
    handle: Option<JoinHandle<Result<()>>>,
}

#[async_trait]
impl ConversionJob for BrickConversionJob {
    async fn poll_percentage(&mut self) -> Result<u8> {
        match &self.handle {
            None => return Ok(100),
            Some(handle) if !handle.is_finished() => {
                return Ok(self.progress.load(Ordering::Acquire).min(RUNNING_CEILING));
            }
            Some(_) => {}
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| DownsampleError::Conversion(format!("conversion task failed: {}", e)))??;
        }
        Ok(100)
    }
}

impl Drop for BrickConversionJob {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        DownsampleError::InvalidDimensions(format!("{} does not fit in memory", value))
    })
}

fn scaled(done: u64, total: u64, start: u64, span: u64) -> u8 {
    let total = total.max(1);
    (start + done.min(total) * span / total).min(100) as u8
}

/// Decode every slice into the padded finest level, then write the pyramid
async fn convert_sequence(
    project: ProjectAccess,
    description: Arc<SequenceDescription>,
    progress: Arc<AtomicU8>,
) -> Result<()> {
    let layout = project.layout();
    let padded = layout.level_extent(layout.finest_level())?;
    let bytes_per_voxel = layout.bytes_per_voxel();
    let (height, width) = (description.height as usize, description.width as usize);

    let mut volume = Array4::<u8>::zeros((
        to_usize(padded.z)?,
        to_usize(padded.y)?,
        to_usize(padded.x)?,
        bytes_per_voxel,
    ));

    let slices = description.files.len();
    for z in 0..slices {
        let sequence = Arc::clone(&description);
        let voxels = tokio::task::spawn_blocking(move || {
            let path = &sequence.files[z];
            sequence.decode_slice(path)
        })
        .await
        .map_err(|e| DownsampleError::Conversion(format!("slice decoder panicked: {}", e)))??;

        let plane = ArrayView3::from_shape((height, width, bytes_per_voxel), &voxels)
            .map_err(|e| DownsampleError::InvalidDimensions(format!("slice {}: {}", z, e)))?;
        volume
            .slice_mut(s![z, ..height, ..width, ..])
            .assign(&plane);

        progress.store(
            scaled(z as u64 + 1, slices as u64, 0, DECODE_SHARE),
            Ordering::Release,
        );
    }
    debug!(slices, "decoded sequence");

    write_pyramid(&project, 0, volume, &progress).await
}

/// Every second voxel of `volume` along each axis, padded or cut to `extent`
fn decimate(volume: &Array4<u8>, extent: (usize, usize, usize)) -> Array4<u8> {
    let sampled = volume.slice(s![..;2, ..;2, ..;2, ..]);
    let (sz, sy, sx, channels) = sampled.dim();
    let (z, y, x) = (sz.min(extent.0), sy.min(extent.1), sx.min(extent.2));

    let mut out = Array4::<u8>::zeros((extent.0, extent.1, extent.2, channels));
    out.slice_mut(s![..z, ..y, ..x, ..])
        .assign(&sampled.slice(s![..z, ..y, ..x, ..]));
    out
}

/// Write `finest` and every coarser level of `project`'s pyramid as bricks.
///
/// `finest` is indexed `(z, y, x, byte)` and must match the padded extent of
/// the finest level. Block writes advance `progress` from 50 to 99.
pub async fn write_pyramid(
    project: &ProjectAccess,
    timepoint: u32,
    finest: Array4<u8>,
    progress: &AtomicU8,
) -> Result<()> {
    let layout = project.layout();
    let finest_level = layout.finest_level();

    let padded = layout.level_extent(finest_level)?;
    let expected = (
        to_usize(padded.z)?,
        to_usize(padded.y)?,
        to_usize(padded.x)?,
        layout.bytes_per_voxel(),
    );
    if finest.dim() != expected {
        return Err(DownsampleError::InvalidDimensions(format!(
            "volume is {:?}, finest level needs {:?}",
            finest.dim(),
            expected
        )));
    }

    let total_blocks: u64 = layout.resolution_map.iter().sum();
    let block = layout.block_size;
    let (bz, by, bx) = (to_usize(block.z)?, to_usize(block.y)?, to_usize(block.x)?);
    let mut written = 0u64;

    let mut current = finest;
    for level in (0..layout.level_count()).rev() {
        let extent = layout.level_extent(level)?;
        if level != finest_level {
            current = decimate(
                &current,
                (to_usize(extent.z)?, to_usize(extent.y)?, to_usize(extent.x)?),
            );
        }

        let edge = layout.blocks_per_axis(level)?;
        for cz in 0..edge {
            for cy in 0..edge {
                for cx in 0..edge {
                    let (z0, y0, x0) = (cz as usize * bz, cy as usize * by, cx as usize * bx);
                    let data: Vec<u8> = current
                        .slice(s![z0..z0 + bz, y0..y0 + by, x0..x0 + bx, ..])
                        .iter()
                        .copied()
                        .collect();
                    project
                        .write_block(timepoint, level, [cz, cy, cx], &data)
                        .await?;

                    written += 1;
                    progress.store(
                        scaled(written, total_blocks, DECODE_SHARE, 49),
                        Ordering::Release,
                    );
                }
            }
        }
        debug!(level, blocks = edge.pow(3), "wrote level");
    }

    Ok(())
}
