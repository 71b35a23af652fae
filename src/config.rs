//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `DOWNSAMPLE_` prefix:
//!
//! - `DOWNSAMPLE_LEVEL` - Option number to downsample to (skips the prompt)
//! - `DOWNSAMPLE_TIMEPOINT` - Timepoint to extract (default: 0)
//! - `DOWNSAMPLE_STAGING_DIR` - Fixed staging directory, cleared before use
//! - `DOWNSAMPLE_OUTPUT_DIR` - Directory for the new project
//! - `DOWNSAMPLE_OVERWRITE` - Replace an existing output project
//! - `DOWNSAMPLE_BLOCK_SIZE` - Block edge of the new project (default: 64)
//! - `DOWNSAMPLE_COMPRESSION` - Brick compression of the new project (default: zstd)
//! - `DOWNSAMPLE_POLL_INTERVAL_MS` - Conversion poll interval (default: 250)

use crate::compression::CompressionMethod;
use crate::convert::BrickConverter;
use crate::downsample::DownsampleOptions;
use crate::layout::DEFAULT_BLOCK_EDGE;
use crate::types::Extent3;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default conversion poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Volume Downsample - rebuild a project at one of its coarser stored resolutions.
///
/// Lists the resolution levels stored in PROJECT, asks which one to keep,
/// and writes it as a new project named `<PROJECT stem>_Downsampled`.
#[derive(Parser, Debug, Clone)]
#[command(name = "volume-downsample")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project directory to downsample.
    #[arg(value_name = "PROJECT")]
    pub project: PathBuf,

    /// Option number from the resolution table; prompts when omitted.
    #[arg(short, long, env = "DOWNSAMPLE_LEVEL")]
    pub level: Option<usize>,

    /// Timepoint to extract from time series projects.
    #[arg(long, default_value_t = 0, env = "DOWNSAMPLE_TIMEPOINT")]
    pub timepoint: u32,

    /// Fixed staging directory. Anything already there is deleted.
    ///
    /// By default a private directory is created beside the output.
    #[arg(long, env = "DOWNSAMPLE_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Directory to create the new project in instead of next to PROJECT.
    #[arg(long, env = "DOWNSAMPLE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Replace the output project if it already exists.
    #[arg(long, default_value_t = false, env = "DOWNSAMPLE_OVERWRITE")]
    pub overwrite: bool,

    /// Block edge, in voxels, of the new project.
    #[arg(long, default_value_t = DEFAULT_BLOCK_EDGE, env = "DOWNSAMPLE_BLOCK_SIZE")]
    pub block_size: u64,

    /// Brick compression of the new project (none, deflate, rle, zstd).
    #[arg(long, default_value = "zstd", env = "DOWNSAMPLE_COMPRESSION")]
    pub compression: CompressionMethod,

    /// Interval between conversion progress polls, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, env = "DOWNSAMPLE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size == 0 {
            return Err("block_size must be greater than 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Writer for the new project
    pub fn converter(&self) -> BrickConverter {
        BrickConverter::new(Extent3::cube(self.block_size)).with_compression(self.compression)
    }

    pub fn downsample_options(&self) -> DownsampleOptions {
        DownsampleOptions {
            timepoint: self.timepoint,
            staging_dir: self.staging_dir.clone(),
            output_dir: self.output_dir.clone(),
            overwrite: self.overwrite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("volume-downsample").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["/data/brain"]).unwrap();
        assert_eq!(cli.project, PathBuf::from("/data/brain"));
        assert_eq!(cli.level, None);
        assert_eq!(cli.timepoint, 0);
        assert_eq!(cli.block_size, DEFAULT_BLOCK_EDGE);
        assert_eq!(cli.compression, CompressionMethod::Zstd);
        assert_eq!(cli.poll_interval(), Duration::from_millis(250));
        assert!(!cli.overwrite);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_options() {
        let cli = parse(&[
            "brain",
            "-l",
            "2",
            "--staging-dir",
            "/tmp/temp",
            "--overwrite",
            "--block-size",
            "32",
            "--compression",
            "deflate",
        ])
        .unwrap();
        assert_eq!(cli.level, Some(2));
        assert_eq!(cli.converter().block_size(), Extent3::cube(32));
        assert_eq!(cli.converter().compression(), CompressionMethod::Deflate);

        let options = cli.downsample_options();
        assert_eq!(options.staging_dir, Some(PathBuf::from("/tmp/temp")));
        assert!(options.overwrite);
        assert_eq!(options.output_dir, None);
    }

    #[test]
    fn test_wrong_arity_is_a_usage_error() {
        let err = parse(&[]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = parse(&["a", "b"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(parse(&["a", "--compression", "lzma"]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut cli = parse(&["brain"]).unwrap();
        cli.block_size = 0;
        assert!(cli.validate().unwrap_err().contains("block_size"));

        let mut cli = parse(&["brain"]).unwrap();
        cli.poll_interval_ms = 0;
        assert!(cli.validate().unwrap_err().contains("poll_interval_ms"));
    }
}
