//! clover
//!
//! A BitTorrent leecher: bencode metainfo parsing, UDP tracker announces,
//! the peer wire protocol, and a coordinator that downloads, verifies, and
//! writes every piece.

pub mod bencode;
pub mod cli;
pub mod download;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod torrent;
pub mod tracker;

pub use error::TorrentError;

pub use bencode::{Malformed, Value};
pub use cli::{CliArgs, Config};
pub use download::{CompletedPiece, DownloadManager, DownloadState, PieceWriter};
pub use peer::{merge_sources, Bitfield, PeerEndpoint, PeerSession, PeerSource};
pub use protocol::{generate_peer_id, Handshake, Message, MessageId};
pub use torrent::{TorrentFile, TorrentInfo, TorrentParser};
pub use tracker::{TrackerClient, TrackerManager};
