//! Peer session
//!
//! Per-peer state machine. A session is created once the handshake and
//! the initial bitfield have succeeded, then loops pulling piece indices
//! from the shared work queue and pipelining block requests for one piece
//! at a time.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cli::Config;
use crate::download::{CompletedPiece, DownloadState};
use crate::error::TorrentError;
use crate::peer::{Bitfield, PeerEndpoint};
use crate::protocol::{Handshake, Message, PeerWire, WireProtocol};
use crate::torrent::TorrentInfo;

/// Size of a single requested block
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Maximum outstanding requests per peer per piece
pub const MAX_BACKLOG: u32 = 10;

/// Shared handles a session needs to take part in a download.
#[derive(Clone)]
pub struct SessionContext {
    pub torrent: Arc<TorrentInfo>,
    pub config: Arc<Config>,
    pub work_tx: async_channel::Sender<u32>,
    pub work_rx: async_channel::Receiver<u32>,
    pub completed_tx: mpsc::Sender<CompletedPiece>,
    pub state: Arc<DownloadState>,
    pub cancel: CancellationToken,
}

/// A piece download in progress, discarded on success or failure.
struct WorkPiece {
    index: u32,
    hash: [u8; 20],
    length: u32,
    buf: Vec<u8>,
    requested: u32,
    received: u32,
    backlog: u32,
}

impl WorkPiece {
    fn new(index: u32, hash: [u8; 20], length: u32) -> Self {
        Self {
            index,
            hash,
            length,
            buf: vec![0u8; length as usize],
            requested: 0,
            received: 0,
            backlog: 0,
        }
    }

    fn verify(&self) -> bool {
        let digest: [u8; 20] = Sha1::digest(&self.buf).into();
        digest == self.hash
    }
}

/// Why a piece download attempt ended without a verified piece.
enum DownloadError {
    /// The assembled buffer did not match the expected hash; the session
    /// survives until its failure threshold.
    HashMismatch,
    /// I/O error, deadline expiry, or protocol violation; the session dies.
    Session(anyhow::Error),
}

/// An established connection to a remote peer.
pub struct PeerSession {
    endpoint: PeerEndpoint,
    stream: TcpStream,
    wire: PeerWire,
    remote_peer_id: [u8; 20],
    choked: bool,
    bitfield: Bitfield,
    failures: u32,
}

impl PeerSession {
    /// Connect to a peer, perform the handshake, and read the mandatory
    /// initial bitfield.
    pub async fn establish(
        endpoint: PeerEndpoint,
        torrent: &TorrentInfo,
        config: &Config,
    ) -> Result<Self> {
        debug!("Connecting to peer {}", endpoint);

        let mut stream = timeout(
            config.handshake_timeout,
            TcpStream::connect(endpoint.socket_addr()),
        )
        .await
        .map_err(|_| {
            TorrentError::peer_error_with_peer("Connect timeout", endpoint.to_string())
        })?
        .map_err(|e| {
            TorrentError::peer_error_full("Failed to connect", endpoint.to_string(), e.to_string())
        })?;

        let mut wire = PeerWire;
        wire.write_handshake(&mut stream, &Handshake::new(torrent.info_hash, config.peer_id))
            .await?;

        let response = timeout(config.handshake_read_timeout, wire.read_handshake(&mut stream))
            .await
            .map_err(|_| {
                TorrentError::peer_error_with_peer("Handshake read timeout", endpoint.to_string())
            })??;

        if !response.validate(&torrent.info_hash) {
            return Err(TorrentError::peer_error_with_peer(
                "Handshake info hash mismatch",
                endpoint.to_string(),
            )
            .into());
        }

        // The peer's first real message must be its bitfield.
        let bitfield = loop {
            let message =
                timeout(config.handshake_read_timeout, wire.read_message(&mut stream))
                    .await
                    .map_err(|_| {
                        TorrentError::peer_error_with_peer(
                            "Timed out waiting for bitfield",
                            endpoint.to_string(),
                        )
                    })??;

            match message {
                Message::KeepAlive => continue,
                Message::Bitfield { bitfield } => {
                    break Bitfield::from_payload(bitfield, torrent.piece_count())?
                }
                other => {
                    return Err(TorrentError::peer_error_with_peer(
                        format!("Expected bitfield, got {:?}", other.message_id()),
                        endpoint.to_string(),
                    )
                    .into())
                }
            }
        };

        info!("Established session with peer {}", endpoint);
        Ok(Self {
            endpoint,
            stream,
            wire,
            remote_peer_id: response.peer_id,
            choked: true,
            bitfield,
            failures: 0,
        })
    }

    /// Peer ID the remote side presented in its handshake
    pub fn remote_peer_id(&self) -> [u8; 20] {
        self.remote_peer_id
    }

    /// Run the session until the work queue closes, the download is
    /// cancelled, or the session dies.
    pub async fn run(mut self, ctx: SessionContext) {
        if let Err(e) = self.send(&Message::Interested).await {
            warn!("Peer {}: failed to send interested: {}", self.endpoint, e);
            return;
        }

        loop {
            let index = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                index = ctx.work_rx.recv() => match index {
                    Ok(index) => index,
                    Err(_) => break, // queue closed, download finished
                },
            };

            // Another session may have finished this piece while the index
            // sat in the queue.
            if ctx.state.is_complete(index) {
                continue;
            }

            if !self.bitfield.has(index as usize) {
                // Hand the index back for a peer that has the piece.
                if ctx.work_tx.send(index).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }

            match self.download_piece(index, &ctx).await {
                Ok(piece) => {
                    if let Err(e) = self.send(&Message::Have { piece_index: index }).await {
                        debug!("Peer {}: failed to send have: {}", self.endpoint, e);
                    }
                    if ctx.completed_tx.send(piece).await.is_err() {
                        break;
                    }
                }
                Err(DownloadError::HashMismatch) => {
                    self.failures += 1;
                    warn!(
                        "Peer {}: piece {} failed verification ({}/{} failures)",
                        self.endpoint, index, self.failures, ctx.config.max_peer_failures
                    );
                    if ctx.work_tx.send(index).await.is_err() {
                        break;
                    }
                    if self.failures >= ctx.config.max_peer_failures {
                        warn!("Peer {}: too many failures, disconnecting", self.endpoint);
                        break;
                    }
                }
                Err(DownloadError::Session(e)) => {
                    debug!("Peer {}: session error on piece {}: {}", self.endpoint, index, e);
                    // Best effort: the queue may already be closed.
                    let _ = ctx.work_tx.send(index).await;
                    break;
                }
            }
        }

        debug!("Session with peer {} closed", self.endpoint);
    }

    /// Download and verify a single piece, pipelining block requests.
    async fn download_piece(
        &mut self,
        index: u32,
        ctx: &SessionContext,
    ) -> Result<CompletedPiece, DownloadError> {
        let length = ctx.torrent.piece_len(index as usize) as u32;
        let hash = ctx
            .torrent
            .piece_hash(index as usize)
            .ok_or_else(|| DownloadError::Session(anyhow!("piece index {} out of range", index)))?;

        let mut work = WorkPiece::new(index, hash, length);
        trace!("Peer {}: downloading piece {} ({} bytes)", self.endpoint, index, length);

        while work.received < work.length {
            // Keep the request pipeline full while the peer lets us.
            while !self.choked && work.backlog < MAX_BACKLOG && work.requested < work.length {
                let block = BLOCK_SIZE.min(work.length - work.requested);
                self.send(&Message::Request {
                    index,
                    begin: work.requested,
                    length: block,
                })
                .await
                .map_err(DownloadError::Session)?;
                work.requested += block;
                work.backlog += 1;
            }

            self.read_one(&mut work, ctx).await?;
        }

        if !work.verify() {
            return Err(DownloadError::HashMismatch);
        }

        debug!("Peer {}: piece {} verified", self.endpoint, index);
        Ok(CompletedPiece {
            index,
            data: work.buf,
        })
    }

    /// Read one message under the per-read deadline and apply it to peer
    /// state or download progress.
    async fn read_one(
        &mut self,
        work: &mut WorkPiece,
        ctx: &SessionContext,
    ) -> Result<(), DownloadError> {
        let message = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(DownloadError::Session(anyhow!("download cancelled")))
            }
            read = timeout(
                ctx.config.piece_read_timeout,
                self.wire.read_message(&mut self.stream),
            ) => read
                .map_err(|_| DownloadError::Session(anyhow!("read deadline expired")))?
                .map_err(DownloadError::Session)?,
        };

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                trace!("Peer {} choked us", self.endpoint);
                self.choked = true;
            }
            Message::Unchoke => {
                trace!("Peer {} unchoked us", self.endpoint);
                self.choked = false;
            }
            Message::Have { piece_index } => self.bitfield.set(piece_index as usize),
            Message::Bitfield { bitfield } => {
                self.bitfield = Bitfield::from_payload(bitfield, ctx.torrent.piece_count())
                    .map_err(DownloadError::Session)?;
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                if index != work.index {
                    return Err(DownloadError::Session(anyhow!(
                        "piece index mismatch: expected {}, got {}",
                        work.index,
                        index
                    )));
                }
                if begin as u64 + block.len() as u64 > work.length as u64 {
                    return Err(DownloadError::Session(anyhow!(
                        "block [{}, {}) exceeds piece length {}",
                        begin,
                        begin as u64 + block.len() as u64,
                        work.length
                    )));
                }
                work.buf[begin as usize..begin as usize + block.len()].copy_from_slice(&block);
                work.received += block.len() as u32;
                work.backlog = work.backlog.saturating_sub(1);
            }
            // DHT port announcements are irrelevant to a leecher.
            Message::Port { .. } => {}
            Message::Unknown { id } => {
                debug!("Peer {}: ignoring unknown message id {}", self.endpoint, id);
            }
            // Upload-side traffic from the peer; a leecher serves nothing.
            Message::Interested
            | Message::NotInterested
            | Message::Request { .. }
            | Message::Cancel { .. } => {}
        }

        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        self.wire.write_message(&mut self.stream, message).await
    }
}
