//! Volume Downsample - rebuild a multi-resolution volume project at one of its
//! coarser stored resolutions
//!
//! A project stores its volume as a pyramid of cubic block grids. Downsampling
//! picks one of the coarser levels, streams it out as a stack of z slices into
//! a staging area, and converts that stack into a new, smaller project.
//!
//! # Pipeline
//!
//! - [`ResolutionCatalog`] derives voxel dimensions and sizes from block metadata
//! - [`ResolutionSelector`] validates the chosen option
//! - [`SliceExtractor`] streams the chosen level one slab at a time
//! - [`ProjectRebuilder`] drives a conversion job over the staged slices
//!
//! The store behind these steps is reached through the [`ProjectReader`] and
//! [`ProjectWriter`] traits; [`ProjectAccess`] and [`BrickConverter`] are the
//! file-backed implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use volume_downsample::{
//!     BrickConverter, DownsampleOptions, Downsampler, ProjectAccess, ProjectRebuilder,
//!     ResolutionCatalog, ResolutionSelector,
//! };
//!
//! # async fn example() -> volume_downsample::Result<()> {
//! let project = ProjectAccess::open("/data/brain").await?;
//! let catalog = ResolutionCatalog::from_project(&project)?;
//! let level = ResolutionSelector::new(&catalog)?.select(1)?;
//!
//! let downsampler = Downsampler::new(
//!     ProjectRebuilder::new(BrickConverter::default()),
//!     DownsampleOptions::default(),
//! );
//! let report = downsampler.run(&project, project.path(), level).await?;
//! println!("created {}", report.output.display());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod convert;
pub mod downsample;
pub mod error;
pub mod extract;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod rebuild;
pub mod selector;
pub mod staging;
pub mod types;
pub mod utils;

// Re-exports
pub use access::{ProjectAccess, ProjectReader};
pub use catalog::{ResolutionCatalog, ResolutionLevel};
pub use compression::{CompressionMethod, Compressor};
pub use convert::BrickConverter;
pub use downsample::{DownsampleOptions, DownsampleReport, Downsampler};
pub use error::{DownsampleError, Result};
pub use extract::{Slab, SliceExtractor};
pub use io::{FileSystemIOManager, IOManager};
pub use layout::ProjectLayout;
pub use metadata::ProjectMetadata;
pub use rebuild::{ConversionJob, ImageSequence, ProjectRebuilder, ProjectWriter};
pub use selector::ResolutionSelector;
pub use staging::{SequenceDescription, SlabFormat, SlabImage, StagingArea};
pub use types::{DataType, Extent3, SliceOffset};
pub use utils::format_bytes;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
