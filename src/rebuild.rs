//! Project rebuild - hands the staged slice sequence to a conversion pipeline
//!
//! The pipeline is an opaque asynchronous job: it is started once, polled for
//! a completion percentage on a fixed interval until it reports 100, and any
//! failure it raises is surfaced unchanged. The staging area is removed
//! afterwards whatever the outcome.

use crate::error::{DownsampleError, Result};
use crate::staging::{SequenceDescription, StagingArea};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Interval between completion polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ordered image stack opened for ingestion
#[derive(Debug, Clone)]
pub struct ImageSequence {
    pub description: SequenceDescription,

    /// Whether files are timepoints rather than z slices
    pub time_series: bool,
}

/// Write/ingest capability of a multi-resolution store
#[async_trait]
pub trait ProjectWriter: Send + Sync {
    /// Open a described file stack as an input sequence
    async fn open_image_sequence(
        &self,
        description: SequenceDescription,
        time_series: bool,
    ) -> Result<ImageSequence>;

    /// Start building a project at `output` from `sequence`
    async fn start_conversion(
        &self,
        sequence: ImageSequence,
        output: &Path,
    ) -> Result<Box<dyn ConversionJob>>;
}

/// A running conversion
#[async_trait]
pub trait ConversionJob: Send {
    /// Completion in percent; 100 means the project is complete.
    async fn poll_percentage(&mut self) -> Result<u8>;
}

/// Drives a [`ProjectWriter`] over a staging area
pub struct ProjectRebuilder<W: ProjectWriter> {
    writer: W,
    poll_interval: Duration,
}

impl<W: ProjectWriter> ProjectRebuilder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Build a project at `output` from the staged slices, then delete the
    /// staging area.
    ///
    /// `on_progress` sees strictly increasing percentages ending at 100. When
    /// the conversion fails, whatever it wrote at `output` is removed.
    pub async fn rebuild<F>(
        &self,
        staging: StagingArea,
        output: &Path,
        on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u8),
    {
        let preexisting = tokio::fs::metadata(output).await.is_ok();
        let result = self.convert(staging.path(), output, on_progress).await;

        if result.is_err() && !preexisting {
            match tokio::fs::remove_dir_all(output).await {
                Ok(()) => debug!(output = %output.display(), "removed partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(output = %output.display(), "failed to remove partial output: {}", e),
            }
        }

        match (staging.close(), &result) {
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(_)) => warn!("failed to remove staging area after error: {}", e),
            (Ok(()), _) => {}
        }

        result.map(|()| output.to_path_buf())
    }

    async fn convert<F>(&self, staging_dir: &Path, output: &Path, mut on_progress: F) -> Result<()>
    where
        F: FnMut(u8),
    {
        let directory = staging_dir.to_path_buf();
        let description = tokio::task::spawn_blocking(move || {
            SequenceDescription::inspect_by_reference_file(directory)
        })
        .await
        .map_err(|e| DownsampleError::Conversion(format!("sequence inspection panicked: {}", e)))??;

        let slices = description.files.len();
        let sequence = self.writer.open_image_sequence(description, false).await?;

        info!(output = %output.display(), slices, "creating project");
        let mut job = self.writer.start_conversion(sequence, output).await?;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reported = 0u8;
        loop {
            ticker.tick().await;
            let percentage = job.poll_percentage().await?.min(100);
            debug!(percentage, "conversion progress");
            if percentage > reported {
                reported = percentage;
                on_progress(reported);
            }
            if reported >= 100 {
                return Ok(());
            }
        }
    }
}
