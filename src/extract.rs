//! Slice extraction - streams one resolution level as consecutive z slabs
//!
//! Slab `z` is the region at offset `(z, 0, 0)` with shape `(1, Y, X)`, so
//! the slabs of a level tile it exactly: no overlap, no gaps, increasing z.
//! Only the slab being yielded is resident.

use crate::access::ProjectReader;
use crate::catalog::ResolutionLevel;
use crate::error::{DownsampleError, Result};
use crate::types::{Axis, Extent3, SliceOffset};
use crate::utils::slice_file_name;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

/// Axis slabs are stacked along
pub const ITERATION_AXIS: Axis = Axis::Z;

/// One 2D slab of a resolution level
#[derive(Debug, Clone)]
pub struct Slab {
    /// Position along the iteration axis
    pub position: u64,

    pub offset: SliceOffset,

    /// `(1, y, x)`
    pub shape: Extent3,

    /// Raw voxels, z-major with interleaved channels
    pub data: Bytes,
}

impl Slab {
    /// Zero-padded staging file name for this slab
    pub fn file_name(&self) -> String {
        slice_file_name(self.position)
    }

    pub fn width(&self) -> u64 {
        self.shape.x
    }

    pub fn height(&self) -> u64 {
        self.shape.y
    }
}

/// Reads a chosen level of a project slab by slab
pub struct SliceExtractor<'a, P: ProjectReader + ?Sized> {
    project: &'a P,
    level: ResolutionLevel,
    timepoint: u32,
}

impl<'a, P: ProjectReader + ?Sized> SliceExtractor<'a, P> {
    pub fn new(project: &'a P, level: ResolutionLevel) -> Self {
        Self {
            project,
            level,
            timepoint: 0,
        }
    }

    /// Extract from `timepoint` instead of the first one
    pub fn with_timepoint(mut self, timepoint: u32) -> Self {
        self.timepoint = timepoint;
        self
    }

    pub fn level(&self) -> &ResolutionLevel {
        &self.level
    }

    /// Number of slabs the level splits into
    pub fn slab_count(&self) -> u64 {
        self.level.dimensions.get(ITERATION_AXIS)
    }

    /// Shape of every slab
    pub fn slab_shape(&self) -> Extent3 {
        self.level.dimensions.with(ITERATION_AXIS, 1)
    }

    /// Raw bytes of one slab
    pub fn slab_bytes(&self) -> u64 {
        let shape = self.slab_shape();
        shape.y * shape.x * self.level.bytes_per_voxel
    }

    /// Read the slab at `position`
    pub async fn read_slab(&self, position: u64) -> Result<Slab> {
        let offset = SliceOffset::along(ITERATION_AXIS, position);
        let shape = self.slab_shape();

        let wrap = |source: DownsampleError| DownsampleError::SliceRead {
            position,
            source: Box::new(source),
        };

        if position >= self.slab_count() {
            return Err(wrap(DownsampleError::OutOfBounds(format!(
                "slab {} of a level {} deep",
                position,
                self.slab_count()
            ))));
        }

        let data = self
            .project
            .get_custom_block(self.timepoint, self.level.level, offset, shape)
            .await
            .map_err(wrap)?;

        let expected = self.slab_bytes();
        if data.len() as u64 != expected {
            return Err(wrap(DownsampleError::InvalidDimensions(format!(
                "store returned {} bytes, expected {}",
                data.len(),
                expected
            ))));
        }

        debug!(position, %offset, "read slab");
        Ok(Slab {
            position,
            offset,
            shape,
            data,
        })
    }

    /// Stream every slab in increasing position order.
    ///
    /// Each call starts again from position zero. Slabs are read one at a
    /// time as the stream is polled.
    pub fn slabs(&self) -> BoxStream<'_, Result<Slab>> {
        stream::iter(0..self.slab_count())
            .then(move |position| self.read_slab(position))
            .boxed()
    }
}
