//! Downsample run - extracts a chosen level into staging and rebuilds it as a
//! new project beside the source

use crate::access::ProjectReader;
use crate::catalog::ResolutionLevel;
use crate::error::{DownsampleError, Result};
use crate::extract::SliceExtractor;
use crate::rebuild::{ProjectRebuilder, ProjectWriter};
use crate::staging::{SlabFormat, StagingArea};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Appended to the source stem to name the output project
pub const DOWNSAMPLED_SUFFIX: &str = "_Downsampled";

/// Percentage step between progress log lines
pub const PROGRESS_STEP: u64 = 10;

/// Location of the project built from `source`.
///
/// The output is a sibling of the source unless `output_dir` is given.
pub fn downsampled_project_path(source: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DownsampleError::InvalidProjectPath(source.to_path_buf()))?;

    let parent = output_dir
        .or_else(|| source.parent())
        .unwrap_or_else(|| Path::new(""));
    Ok(parent.join(format!("{}{}", stem, DOWNSAMPLED_SUFFIX)))
}

/// Per-run settings
#[derive(Debug, Clone, Default)]
pub struct DownsampleOptions {
    /// Timepoint to extract
    pub timepoint: u32,

    /// Fixed staging directory; a scoped one beside the output otherwise
    pub staging_dir: Option<PathBuf>,

    /// Directory for the output instead of the source's parent
    pub output_dir: Option<PathBuf>,

    /// Replace an existing output project
    pub overwrite: bool,
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct DownsampleReport {
    pub output: PathBuf,
    pub level: ResolutionLevel,
    pub slab_count: u64,
    /// Raw bytes extracted from the source
    pub extracted_bytes: u64,
}

/// Runs extraction and rebuild for one project
pub struct Downsampler<W: ProjectWriter> {
    rebuilder: ProjectRebuilder<W>,
    options: DownsampleOptions,
}

impl<W: ProjectWriter> Downsampler<W> {
    pub fn new(rebuilder: ProjectRebuilder<W>, options: DownsampleOptions) -> Self {
        Self { rebuilder, options }
    }

    pub fn options(&self) -> &DownsampleOptions {
        &self.options
    }

    /// Build `<stem>_Downsampled` from `level` of the project at `source`.
    ///
    /// Everything that can be rejected up front is checked before the
    /// staging area or the output is touched. A replaced output is only
    /// deleted once the new project is complete.
    pub async fn run<P: ProjectReader + ?Sized>(
        &self,
        project: &P,
        source: &Path,
        level: ResolutionLevel,
    ) -> Result<DownsampleReport> {
        let format = SlabFormat::new(project.data_type(), project.channel_count())?;
        self.check_timepoint(project)?;

        let output = downsampled_project_path(source, self.options.output_dir.as_deref())?;
        let replacing = self.check_output(&output).await?;

        let staging = match &self.options.staging_dir {
            Some(dir) => {
                check_staging_location(dir, &[source, output.as_path()])?;
                StagingArea::at(dir)?
            }
            None => {
                let parent = output
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                StagingArea::scoped_in(parent)?
            }
        };

        let extractor = SliceExtractor::new(project, level.clone())
            .with_timepoint(self.options.timepoint);
        let slab_count = extractor.slab_count();
        let extracted_bytes = extractor.slab_bytes() * slab_count;

        info!(
            "extracting option {} ({}, {}) into {}",
            level.index,
            level.dimensions,
            level.size_label(),
            staging.path().display()
        );
        if let Err(e) = stage_slabs(&extractor, &staging, format).await {
            if let Err(cleanup) = staging.close() {
                warn!("failed to remove staging area after error: {}", cleanup);
            }
            return Err(e);
        }

        let replaced = if replacing {
            match set_aside(&output).await {
                Ok(replaced) => Some(replaced),
                Err(e) => {
                    if let Err(cleanup) = staging.close() {
                        warn!("failed to remove staging area after error: {}", cleanup);
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        let rebuilt = self
            .rebuilder
            .rebuild(staging, &output, |percentage| {
                info!("creating project: {}%", percentage)
            })
            .await;

        let output = match (rebuilt, replaced) {
            (Ok(output), replaced) => {
                if let Some(replaced) = replaced {
                    if let Err(e) = tokio::fs::remove_dir_all(&replaced).await {
                        warn!(path = %replaced.display(), "failed to remove replaced project: {}", e);
                    }
                }
                output
            }
            (Err(e), Some(replaced)) => {
                restore(&replaced, &output).await;
                return Err(e);
            }
            (Err(e), None) => return Err(e),
        };
        info!(output = %output.display(), "downsampled project created");

        Ok(DownsampleReport {
            output,
            level,
            slab_count,
            extracted_bytes,
        })
    }

    fn check_timepoint<P: ProjectReader + ?Sized>(&self, project: &P) -> Result<()> {
        let count = project.timepoint_count();
        if self.options.timepoint >= count {
            return Err(DownsampleError::Configuration(format!(
                "timepoint {} requested but the project has {}",
                self.options.timepoint, count
            )));
        }
        if count > 1 {
            warn!(
                "{} is a time series of {} timepoints; only timepoint {} is downsampled",
                project.name(),
                count,
                self.options.timepoint
            );
        }
        Ok(())
    }

    /// Whether an existing output will be replaced; refused without overwrite
    async fn check_output(&self, output: &Path) -> Result<bool> {
        if tokio::fs::metadata(output).await.is_err() {
            return Ok(false);
        }
        if !self.options.overwrite {
            return Err(DownsampleError::AlreadyExists(output.to_path_buf()));
        }
        warn!(output = %output.display(), "existing output will be replaced");
        Ok(true)
    }
}

/// `path` made absolute, with symlinks resolved as far as it exists
fn resolve(path: &Path) -> Result<PathBuf> {
    let mut existing = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };
    let mut missing = Vec::new();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            return Ok(missing
                .iter()
                .rev()
                .fold(resolved, |resolved, name| resolved.join(name)));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
            }
            _ => return Ok(std::env::current_dir()?.join(path)),
        }
    }
}

/// Refuse a fixed staging directory that is, holds or sits inside any of `protected`
fn check_staging_location(staging: &Path, protected: &[&Path]) -> Result<()> {
    let staging_resolved = resolve(staging)?;
    for path in protected {
        let resolved = resolve(path)?;
        if resolved.starts_with(&staging_resolved) || staging_resolved.starts_with(&resolved) {
            return Err(DownsampleError::Configuration(format!(
                "staging directory {} overlaps {}",
                staging.display(),
                path.display()
            )));
        }
    }
    Ok(())
}

/// Move an output that is about to be replaced to a hidden sibling
async fn set_aside(output: &Path) -> Result<PathBuf> {
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DownsampleError::InvalidProjectPath(output.to_path_buf()))?;
    let replaced = output.with_file_name(format!(".{}.replaced-{}", name, Uuid::new_v4().simple()));
    tokio::fs::rename(output, &replaced).await?;
    debug!(from = %output.display(), to = %replaced.display(), "set aside existing output");
    Ok(replaced)
}

/// Put a set-aside output back after a failed rebuild
async fn restore(replaced: &Path, output: &Path) {
    if tokio::fs::metadata(output).await.is_ok() {
        if let Err(e) = tokio::fs::remove_dir_all(output).await {
            warn!(output = %output.display(), "failed to remove partial output: {}", e);
        }
    }
    match tokio::fs::rename(replaced, output).await {
        Ok(()) => info!(output = %output.display(), "restored previous output"),
        Err(e) => warn!(
            "previous output left at {} and could not be restored: {}",
            replaced.display(),
            e
        ),
    }
}

/// Write every slab of `extractor` into `staging`, logging each progress step
async fn stage_slabs<P: ProjectReader + ?Sized>(
    extractor: &SliceExtractor<'_, P>,
    staging: &StagingArea,
    format: SlabFormat,
) -> Result<()> {
    let total = extractor.slab_count().max(1);
    let mut slabs = extractor.slabs();
    let mut staged = 0u64;
    let mut next_report = PROGRESS_STEP;

    while let Some(slab) = slabs.try_next().await? {
        let path = staging.write_slab(slab, format).await?;
        debug!(path = %path.display(), "staged slab");

        staged += 1;
        let percentage = staged * 100 / total;
        if percentage >= next_report {
            info!("extracting slices: {}%", percentage);
            next_report = (percentage / PROGRESS_STEP + 1) * PROGRESS_STEP;
        }
    }
    Ok(())
}
