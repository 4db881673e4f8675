//! Wires a `FilterPipeline` and a `ProcessingServer` together, standing in
//! for the concrete job activators, storage, and scheduler a hosting
//! application would normally supply.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use processing_server::config::{AppConfig, CliArgs, FileConfig};
use processing_server::context::{CancellationSignals, StorageHandle};
use processing_server::demo_job::{CountingPerformer, LoggingExceptionFilter, LoggingFilter, TickingProcess};
use processing_server::filter::StaticFilterProvider;
use processing_server::job::JobId;
use processing_server::server::{run_until_signal, BackgroundProcess, ProcessingServer};
use processing_server::{Filter, FilterPipeline, PerformContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .ok();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args, file_config)?;

    info!(server_options = ?app_config.server_options, "processing server configured");

    let processes: Vec<Arc<dyn BackgroundProcess>> = vec![Arc::new(TickingProcess::new(
        "demo-ticker",
        Duration::from_secs(5),
    ))];
    let mut server = ProcessingServer::new(processes, app_config.server_options.clone());

    let filters: Vec<Arc<dyn Filter>> = vec![Arc::new(LoggingFilter), Arc::new(LoggingExceptionFilter)];
    let pipeline = FilterPipeline::new(
        Arc::new(StaticFilterProvider::new(filters)),
        Arc::new(CountingPerformer::default()),
    );

    let ctx = PerformContext::new(
        JobId::new("demo-job"),
        Arc::new(()) as StorageHandle,
        CancellationSignals::standalone(),
    );
    let result = pipeline.perform(&ctx).await;
    info!(?result, "demo job performed once at startup");

    run_until_signal(&mut server).await?;
    server.dispose().await?;
    Ok(())
}
