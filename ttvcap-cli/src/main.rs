mod cli;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use capture_engine::{
    CaptureConfig, CaptureController, HttpSegmentSource, PlaylistResolver, ProgressObserver,
    PubSubClient, SegmentDownloader, TokenProvider, TracingObserver, default_client,
};
use clap::Parser;
use colored::Colorize;
use std::process;
use tokio::sync::{broadcast, mpsc};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::output::ConsoleProgress;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet)?;

    let login = match args.channel {
        Some(channel) => channel,
        None => inquire::Text::new("Channel login:")
            .prompt()
            .context("no channel login given")?,
    };

    let mut config = CaptureConfig::default();
    config.output_config.root_dir = args.output;
    config.poll_config.poll_interval = Duration::from_secs(args.poll_interval.max(1));
    let config = Arc::new(config);

    let http_client = default_client();
    let tokens = Arc::new(TokenProvider::new(
        http_client.clone(),
        Arc::new(config.token_config.clone()),
    ));
    let playlists = Arc::new(PlaylistResolver::new(
        http_client.clone(),
        Arc::new(config.poll_config.clone()),
    ));
    let observer: Arc<dyn ProgressObserver> = if args.quiet {
        Arc::new(TracingObserver)
    } else {
        Arc::new(ConsoleProgress::new())
    };
    let downloader = SegmentDownloader::new(
        Arc::new(HttpSegmentSource::new(
            http_client,
            Arc::new(config.fetcher_config.clone()),
        )),
        observer.clone(),
    );

    let mut controller = CaptureController::new(
        Arc::clone(&config),
        tokens,
        playlists,
        downloader,
        observer,
        login.clone(),
    );
    let channel_id = controller
        .prepare()
        .await
        .with_context(|| format!("could not acquire a playback token for '{login}'"))?;
    info!(login, channel_id, "subscribing to playback events");

    let (event_tx, event_rx) = mpsc::channel(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pubsub = PubSubClient::new(
        Arc::new(config.pubsub_config.clone()),
        channel_id,
        event_tx,
    );
    let pubsub_handle = tokio::spawn(pubsub.run(shutdown_tx.subscribe()));
    let controller_handle = tokio::spawn(controller.run(event_rx, shutdown_tx.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("interrupt received, stopping capture");
    let _ = shutdown_tx.send(());

    let _ = controller_handle.await;
    let _ = pubsub_handle.await;
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbose))
        .with(filter)
        .init();

    Ok(())
}
