//! Tracker manager
//!
//! Spawns one announce loop per tracker URL and feeds every peer the
//! trackers return into a single endpoint stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::peer::{PeerEndpoint, PeerSource};
use crate::torrent::TorrentInfo;
use crate::tracker::client::TrackerClient;
use crate::tracker::packet::{AnnounceEvent, AnnounceRequest};

/// Announce loops for every tracker in the metainfo.
pub struct TrackerManager {
    torrent: Arc<TorrentInfo>,
    config: Arc<Config>,
    /// Random announce key, fixed for the session
    key: u32,
}

impl TrackerManager {
    pub fn new(torrent: Arc<TorrentInfo>, config: Arc<Config>) -> Self {
        Self {
            torrent,
            config,
            key: rand::random(),
        }
    }
}

#[async_trait]
impl PeerSource for TrackerManager {
    fn name(&self) -> &'static str {
        "tracker"
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<PeerEndpoint>> {
        let (tx, rx) = mpsc::channel(256);

        let urls: Vec<String> = self
            .torrent
            .announce_list
            .iter()
            .take(self.config.max_tracker_connections)
            .cloned()
            .collect();

        if urls.is_empty() {
            // Not fatal: another source may still produce peers.
            warn!("Torrent has no UDP trackers");
        }
        info!("Starting {} tracker announce loops", urls.len());

        for url in urls {
            tokio::spawn(announce_loop(
                url,
                self.torrent.clone(),
                self.config.clone(),
                self.key,
                tx.clone(),
                cancel.clone(),
            ));
        }

        Ok(rx)
    }
}

/// One tracker's lifetime: connect, announce, forward peers, sleep on the
/// returned interval, repeat. Any tracker failure ends only this loop.
async fn announce_loop(
    url: String,
    torrent: Arc<TorrentInfo>,
    config: Arc<Config>,
    key: u32,
    tx: mpsc::Sender<PeerEndpoint>,
    cancel: CancellationToken,
) {
    let mut client = tokio::select! {
        _ = cancel.cancelled() => return,
        connected = TrackerClient::connect(&url, config.tracker_connect_timeout) => {
            match connected {
                Ok(client) => client,
                Err(e) => {
                    warn!("[tracker] {}: {}", url, e);
                    return;
                }
            }
        }
    };

    let mut event = AnnounceEvent::Started;
    loop {
        let request = AnnounceRequest {
            connection_id: 0, // filled by the client
            transaction_id: 0,
            info_hash: torrent.info_hash,
            peer_id: config.peer_id,
            downloaded: 0,
            left: torrent.total_length,
            uploaded: 0,
            event,
            ip: 0, // let the tracker use the source address
            key,
            num_want: config.effective_num_want(),
            port: config.port,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            announced = client.announce(request) => match announced {
                Ok(response) => response,
                Err(e) => {
                    warn!("[tracker] {}: {}", url, e);
                    return;
                }
            }
        };

        debug!(
            "[tracker] {}: {} peers ({} seeders, {} leechers), interval {}s",
            url,
            response.peers.len(),
            response.seeders,
            response.leechers,
            response.interval
        );

        for peer in response.peers {
            if peer.is_unspecified() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(peer) => {
                    if sent.is_err() {
                        return; // consumer is gone
                    }
                }
            }
        }

        event = AnnounceEvent::None;
        let interval =
            Duration::from_secs(response.interval as u64).max(config.default_tracker_interval);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
