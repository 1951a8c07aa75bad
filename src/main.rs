// Main entry point - Dependency injection and batch run
mod application;
mod domain;
mod infrastructure;
mod presentation;

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::application::analysis_request::AnalysisKind;
use crate::application::archive_repository::{ArchiveLocator, SampleReader, StateProvider};
use crate::application::overflow_scanner::OverflowScanner;
use crate::application::saturation_service::SaturationService;
use crate::infrastructure::config::{ArchiveKind, load_analysis_config};
use crate::infrastructure::datafind_locator::DatafindLocator;
use crate::infrastructure::directory_archive::{DirectoryLocator, JsonArchiveReader};
use crate::infrastructure::record_writer::write_interval_record;
use crate::infrastructure::segment_db_provider::SegmentDbProvider;
use crate::presentation::cli::Cli;
use crate::presentation::report::{render_report, write_report};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let kind = cli.command.kind();
    let args = cli.command.args();

    // Load configuration
    let config = load_analysis_config(args.config.as_deref(), &args.overrides())?;
    let request = config.request()?;

    // Create collaborators (infrastructure layer)
    let locator: Arc<dyn ArchiveLocator> = match config.archive.kind {
        ArchiveKind::Directory => Arc::new(DirectoryLocator::new(
            config.archive.path.clone().unwrap_or_default(),
        )),
        ArchiveKind::Datafind => Arc::new(DatafindLocator::new(
            config.archive.host.clone(),
            config.archive.url_template.clone(),
        )),
    };
    let reader: Arc<dyn SampleReader> = Arc::new(JsonArchiveReader);
    let state: Option<Arc<dyn StateProvider>> = config.state.host.clone().map(|host| {
        let provider = SegmentDbProvider::new(host, config.state.url_template.clone());
        Arc::new(provider) as Arc<dyn StateProvider>
    });
    let pool = config.worker_pool();

    tracing::info!(
        "{} for {} over [{}, {}) with {} workers",
        kind.title(),
        request.site,
        request.start,
        request.end,
        pool.workers()
    );

    // Run the analysis (application layer)
    let outcome = match kind {
        AnalysisKind::Saturations => {
            SaturationService::new(locator, reader, state, config.saturation_settings(), pool)
                .run(&request)
                .await?
        }
        AnalysisKind::Overflows => {
            OverflowScanner::new(locator, reader, state, config.overflow_settings(), pool)
                .run(&request)
                .await?
        }
    };

    // Write artifacts
    write_interval_record(
        &config.output.directory,
        kind,
        &request,
        &outcome,
        config.output.compress,
    )
    .await?;
    if config.output.report {
        let body = render_report(kind, &request, &outcome, &config.parameters(kind));
        write_report(&config.output.directory, kind, &request, &body).await?;
    }

    Ok(())
}
