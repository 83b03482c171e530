//! Torrent metainfo module
//!
//! This module provides functionality for parsing .torrent files and
//! interpreting the decoded info dictionary.

pub mod info;
pub mod parser;

pub use info::{TorrentFile, TorrentInfo};
pub use parser::TorrentParser;
