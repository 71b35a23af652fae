//! Volume Downsample - command-line entry point.
//!
//! Opens a project, shows its resolution levels, reads the chosen option and
//! builds the downsampled project next to the source.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volume_downsample::{
    config::Cli, DownsampleError, Downsampler, ProjectAccess, ProjectReader, ProjectRebuilder,
    ResolutionCatalog, ResolutionSelector,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let project = ProjectAccess::open(&cli.project)
        .await
        .with_context(|| format!("Failed to open {}", cli.project.display()))?;
    info!("Opened {}: {}", project.name(), project.layout().summary());

    let catalog = ResolutionCatalog::from_project(&project)
        .context("Failed to read the stored resolution levels")?;
    let selector = match ResolutionSelector::new(&catalog) {
        Ok(selector) => selector,
        Err(DownsampleError::SingleResolutionLevel) => {
            info!("{}", DownsampleError::SingleResolutionLevel);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("\nResolution levels of {}:\n", project.name());
    print!("{}", selector.render_table());

    let level = match cli.level {
        Some(index) => selector.select(index)?,
        None => {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            selector.prompt(&mut input, &mut output)?
        }
    };

    let rebuilder = ProjectRebuilder::new(cli.converter()).with_poll_interval(cli.poll_interval());
    let downsampler = Downsampler::new(rebuilder, cli.downsample_options());
    let report = downsampler
        .run(&project, &cli.project, level)
        .await
        .context("Downsampling failed")?;

    println!(
        "\nDownsampled project created at {} ({} slices, {})",
        report.output.display(),
        report.slab_count,
        report.level.size_label()
    );
    Ok(())
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "volume_downsample=debug"
    } else {
        "volume_downsample=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
