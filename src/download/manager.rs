//! Download coordinator
//!
//! Owns the piece work queue, admits peer endpoints and spawns a session
//! per peer, accounts for completed pieces, and terminates the download
//! once every piece is verified and written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::download::writer::PieceWriter;
use crate::peer::{Bitfield, PeerEndpoint, PeerSession, SessionContext};
use crate::torrent::TorrentInfo;

/// Capacity of the verified-piece channel between sessions and the writer
const COMPLETED_CHANNEL_CAPACITY: usize = 50;

/// How long an endpoint stays barred from re-admission
const READMIT_COOLDOWN: Duration = Duration::from_secs(300);

/// A verified piece on its way to the writer. Produced exactly once per
/// index unless a write failure sends the index back to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPiece {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Download-wide shared state.
///
/// The completion bitmap is the source of truth for which pieces are done;
/// the work queue may transiently hold indices whose bit is already set,
/// and sessions drop those on dequeue.
pub struct DownloadState {
    completed: Mutex<Bitfield>,
    peer_count: AtomicU32,
}

impl DownloadState {
    pub fn new(piece_count: usize) -> Self {
        Self {
            completed: Mutex::new(Bitfield::new(piece_count)),
            peer_count: AtomicU32::new(0),
        }
    }

    fn bitmap(&self) -> MutexGuard<'_, Bitfield> {
        // A poisoned lock can only mean a panic mid-bit-flip; the bitmap
        // itself is still usable.
        self.completed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_complete(&self, index: u32) -> bool {
        self.bitmap().has(index as usize)
    }

    pub fn mark_complete(&self, index: u32) {
        self.bitmap().set(index as usize);
    }

    pub fn clear_complete(&self, index: u32) {
        self.bitmap().clear(index as usize);
    }

    pub fn peer_connected(&self) -> u32 {
        self.peer_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn peer_disconnected(&self) {
        self.peer_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peers(&self) -> u32 {
        self.peer_count.load(Ordering::SeqCst)
    }
}

/// Endpoint admission: drop duplicates until their cooldown elapses.
struct EndpointLedger {
    seen: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl EndpointLedger {
    fn new(cooldown: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    fn admit(&self, endpoint: &PeerEndpoint) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = endpoint.key();
        match seen.get(&key) {
            Some(last) if last.elapsed() < self.cooldown => false,
            _ => {
                seen.insert(key, Instant::now());
                true
            }
        }
    }
}

/// Drives a whole download from endpoint stream to verified output.
pub struct DownloadManager {
    torrent: Arc<TorrentInfo>,
    config: Arc<Config>,
    state: Arc<DownloadState>,
    cancel: CancellationToken,
}

impl DownloadManager {
    pub fn new(
        torrent: Arc<TorrentInfo>,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(DownloadState::new(torrent.piece_count()));
        Self {
            torrent,
            config,
            state,
            cancel,
        }
    }

    pub fn state(&self) -> Arc<DownloadState> {
        self.state.clone()
    }

    /// Run the download to completion, consuming peer endpoints from
    /// `endpoints` and writing verified pieces to disk.
    ///
    /// Returns once every piece is verified and written, or with an error
    /// if the download was cancelled first.
    pub async fn run(&self, endpoints: mpsc::Receiver<PeerEndpoint>) -> Result<()> {
        // Output layout problems are fatal before any piece moves.
        let writer = PieceWriter::new(&self.config.output_dir, self.torrent.clone())?;

        let piece_count = self.torrent.piece_count();
        let (work_tx, work_rx) = async_channel::bounded(piece_count);
        for index in 0..piece_count as u32 {
            // Capacity equals the piece count, so seeding never blocks.
            work_tx
                .send(index)
                .await
                .map_err(|_| anyhow!("work queue closed during seeding"))?;
        }

        let (completed_tx, mut completed_rx) = mpsc::channel(COMPLETED_CHANNEL_CAPACITY);

        let ctx = SessionContext {
            torrent: self.torrent.clone(),
            config: self.config.clone(),
            work_tx: work_tx.clone(),
            work_rx: work_rx.clone(),
            completed_tx,
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };
        let acceptor = tokio::spawn(accept_endpoints(endpoints, ctx));

        let mut done = 0usize;
        while done < piece_count {
            let piece = tokio::select! {
                _ = self.cancel.cancelled() => break,
                piece = completed_rx.recv() => match piece {
                    Some(piece) => piece,
                    None => break,
                },
            };

            // The write happens before the completion bit is set, so the
            // bitmap never claims bytes that are not on disk.
            match writer.write_piece(piece.index, &piece.data) {
                Ok(()) => {
                    self.state.mark_complete(piece.index);
                    done += 1;
                    info!(
                        "[download] completed piece {} ({}/{}) (peers: {})",
                        piece.index,
                        done,
                        piece_count,
                        self.state.peers()
                    );
                }
                Err(e) => {
                    warn!("[download] failed to write piece {}: {}", piece.index, e);
                    self.state.clear_complete(piece.index);
                    if work_tx.send(piece.index).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Shut everything down: no more work, no more peers.
        work_rx.close();
        self.cancel.cancel();
        let _ = acceptor.await;

        if done == piece_count {
            info!("[download] download completed");
            Ok(())
        } else {
            Err(anyhow!(
                "download cancelled with {}/{} pieces written",
                done,
                piece_count
            ))
        }
    }
}

/// Consume the endpoint stream, deduplicate, and spawn a session task per
/// admitted endpoint.
async fn accept_endpoints(mut endpoints: mpsc::Receiver<PeerEndpoint>, ctx: SessionContext) {
    let ledger = EndpointLedger::new(READMIT_COOLDOWN);

    loop {
        let endpoint = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            endpoint = endpoints.recv() => match endpoint {
                Some(endpoint) => endpoint,
                None => break, // all sources exhausted
            },
        };

        if endpoint.is_unspecified() {
            continue;
        }
        if !ledger.admit(&endpoint) {
            debug!("Dropping recently seen endpoint {}", endpoint);
            continue;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            match PeerSession::establish(endpoint, &ctx.torrent, &ctx.config).await {
                Ok(session) => {
                    let peers = ctx.state.peer_connected();
                    debug!("Peer {} joined ({} active)", endpoint, peers);
                    session.run(ctx.clone()).await;
                    ctx.state.peer_disconnected();
                }
                // Endpoints that never become sessions are discarded quietly.
                Err(e) => debug!("Peer {} rejected: {}", endpoint, e),
            }
        });
    }

    debug!("Endpoint acceptor exiting");
}
