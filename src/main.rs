use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use targetvision::camera::{CameraSystem, FrameSource, ReplaySource};
use targetvision::config::TargetingConfig;
use targetvision::link::TelemetryLink;
use targetvision::pipeline::TargetingPipeline;
use targetvision::telemetry::{LocalTable, TelemetryKeys, TelemetryPublisher};

#[derive(Parser)]
#[command(name = "targetvision")]
#[command(about = "Color-keyed target bearing and range for a robot vision coprocessor")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "targetvision.toml")]
    config: String,

    /// Camera device index, overriding the config file
    #[arg(short = 'd', long)]
    camera_device: Option<u32>,

    /// Replay image files from a directory instead of opening a camera
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Telemetry server address; enables the TCP link
    #[arg(short, long)]
    server: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("targetvision={}", log_level))
        .try_init();

    info!("Starting targetvision");

    let mut config = TargetingConfig::load(&args.config).await?;
    if let Some(index) = args.camera_device {
        config.camera.index = index;
    }
    if let Some(dir) = args.replay {
        config.camera.replay_dir = Some(dir);
    }
    if let Some(server) = args.server {
        config.telemetry.server = server;
        config.telemetry.enabled = true;
    }
    config.validate()?;
    info!("Configuration loaded from {}", args.config);

    let table = Arc::new(LocalTable::new());
    let publisher = Arc::new(TelemetryPublisher::new(
        table.clone(),
        TelemetryKeys::from_config(&config.telemetry),
    ));
    let mut listener = publisher.spawn_listener()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Unable to listen for Ctrl-C: {}", e);
                // Keep the sender alive so the pipeline is not stopped by its drop
                std::future::pending::<()>().await;
            }
        }
    });

    let link = if config.telemetry.enabled {
        info!("Mirroring telemetry to {}", config.telemetry.server);
        Some(TelemetryLink::new(table.clone(), &config.telemetry).spawn(shutdown_rx.clone()))
    } else {
        info!("Telemetry link disabled, estimates are only held locally");
        None
    };

    let source = open_source(&config)?;
    let mut pipeline = TargetingPipeline::new(&config, source, publisher.clone())?;
    let result = pipeline.run(shutdown_rx).await;

    listener.stop();
    if let Some(link) = link {
        link.abort();
    }

    match result {
        Ok(()) => {
            let stats = pipeline.stats();
            info!(
                "Done: {} frames processed, {} skipped, {} publishes",
                stats.frames_processed,
                stats.frames_skipped,
                publisher.publish_count()
            );
            Ok(())
        }
        Err(e) => {
            error!("Pipeline error: {}", e);
            Err(e.into())
        }
    }
}

fn open_source(config: &TargetingConfig) -> Result<Box<dyn FrameSource>> {
    match &config.camera.replay_dir {
        Some(dir) => Ok(Box::new(ReplaySource::open(dir)?)),
        None => {
            let mut camera = CameraSystem::new(config.camera.clone());
            camera.initialize()?;
            Ok(Box::new(camera))
        }
    }
}
