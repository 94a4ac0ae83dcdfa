use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use castmix::session::Session;
use castmix::transport::{self, Endpoints};
use castmix::Config;

/// Screencast archive mixer: ingests timestamped stills and per-subscriber
/// growing audio files, emits one time-aligned archive.
#[derive(Parser)]
#[command(name = "castmix", version)]
struct Cli {
    /// Archive destination: a file path, or an rtmp:// URL to stream.
    #[arg(short, long, default_value = "output.mp4")]
    output: String,

    /// Optional config file (TOML/YAML/JSON, via the config crate).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    info!(
        "castmix v{}: {} @ {}fps -> {}",
        env!("CARGO_PKG_VERSION"),
        config.audio_format(),
        config.video.fps,
        cli.output
    );

    let (command_tx, command_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interrupt = Arc::new(AtomicBool::new(false));

    let endpoints = Endpoints::from_prefix(&config.session.endpoint_prefix);
    let ingest = tokio::spawn(transport::serve(endpoints, command_tx, shutdown_rx));

    {
        let interrupt = Arc::clone(&interrupt);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt");
                interrupt.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let session = Session::new(config, cli.output, command_rx, interrupt);
    let stats = session.run().await?;

    let _ = shutdown_tx.send(true);
    let _ = ingest.await;

    info!(
        "archived {} video / {} audio frames",
        stats.video_frames_out, stats.audio_frames_out
    );
    Ok(())
}
