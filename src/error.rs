//! Error types for downsampling operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for downsample operations
#[derive(Error, Debug)]
pub enum DownsampleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The path {} is not a valid project", .0.display())]
    InvalidProjectPath(PathBuf),

    #[error("The project only contains one resolution level; nothing to downsample")]
    SingleResolutionLevel,

    #[error("Invalid resolution data: {0}")]
    InvalidResolutionData(String),

    #[error("Option {index} is not in the table (expected 1 to {})", .resolution_count.saturating_sub(1))]
    OutOfRangeSelection {
        index: usize,
        resolution_count: usize,
    },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Input closed before a resolution was selected")]
    InputClosed,

    #[error("Failed to read slice {position}: {source}")]
    SliceRead {
        position: u64,
        #[source]
        source: Box<DownsampleError>,
    },

    #[error("Staging sequence at {} contains no images", .0.display())]
    EmptyStagingSequence(PathBuf),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid project format: {0}")]
    InvalidFormat(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch for {path}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DownsampleError {
    /// Whether the operator can correct this by answering the prompt again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DownsampleError::OutOfRangeSelection { .. } | DownsampleError::InvalidSelection(_)
        )
    }
}

/// Specialized Result type for downsample operations
pub type Result<T> = std::result::Result<T, DownsampleError>;

impl From<bincode::Error> for DownsampleError {
    fn from(err: bincode::Error) -> Self {
        DownsampleError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DownsampleError {
    fn from(err: serde_json::Error) -> Self {
        DownsampleError::Serialization(err.to_string())
    }
}

impl From<tiff::TiffError> for DownsampleError {
    fn from(err: tiff::TiffError) -> Self {
        DownsampleError::Image(err.to_string())
    }
}
