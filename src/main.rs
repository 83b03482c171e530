//! clover - main entry point
//!
//! Parses the metainfo, starts the tracker announce loops, and runs the
//! download coordinator until every piece is verified and written.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use clover::{
    merge_sources, CliArgs, Config, DownloadManager, PeerSource, TorrentParser, TrackerManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);

    // Malformed metainfo is fatal before anything else starts.
    let torrent = TorrentParser::parse_file(&args.torrent_file)
        .context("Failed to load torrent file")?;

    let config = Config::new(args.download_root());
    config.validate().context("Invalid configuration")?;

    info!(
        "Downloading {} ({} bytes, {} pieces, {} trackers)",
        torrent.name,
        torrent.total_length,
        torrent.piece_count(),
        torrent.announce_list.len()
    );
    info!("Info hash: {}", torrent.info_hash_hex());
    info!("Output directory: {}", config.output_dir.display());

    let torrent = Arc::new(torrent);
    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    // Ctrl-C turns into a cooperative shutdown of every task.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    // The tracker manager is the only peer source wired in; a DHT node
    // would be merged into the same stream here.
    let mut trackers = TrackerManager::new(torrent.clone(), config.clone());
    let tracker_stream = trackers.start(cancel.clone()).await?;
    let endpoints = merge_sources(vec![tracker_stream], cancel.clone());

    let manager = DownloadManager::new(torrent, config, cancel);
    manager.run(endpoints).await?;

    info!("Download completed successfully");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}
