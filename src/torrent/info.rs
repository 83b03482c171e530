//! Torrent information structures
//!
//! Immutable view of a parsed metainfo file, shared read-only by every
//! other component.

use anyhow::Result;
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// A file entry in the torrent, with its cumulative byte offset within the
/// concatenated content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Relative path components (empty for the single file of a
    /// single-file torrent)
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
    /// Sum of the lengths of all preceding files
    pub offset: u64,
}

impl TorrentFile {
    /// Byte interval `[offset, offset + length)` this file covers.
    pub fn span(&self) -> (u64, u64) {
        (self.offset, self.offset + self.length)
    }
}

/// High-level torrent information, immutable after construction.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// UDP tracker endpoints as `host:port`, in announce-list order
    pub announce_list: Vec<String>,
    /// SHA1 hash of the raw info dictionary bytes
    pub info_hash: [u8; 20],
    /// Torrent name (output file or directory name)
    pub name: String,
    /// Size of each piece in bytes (the last piece may be shorter)
    pub piece_length: u64,
    /// Sum of all file lengths
    pub total_length: u64,
    /// 20-byte SHA1 hash per piece
    pub pieces: Vec<[u8; 20]>,
    /// Ordered file table with cumulative offsets
    pub files: Vec<TorrentFile>,
    /// Whether the metainfo used `info.files` rather than `info.length`
    pub multi_file: bool,
    /// Optional metadata carried verbatim
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    pub comment: Option<String>,
    pub encoding: Option<String>,
}

impl TorrentInfo {
    /// Get number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of piece `index`.
    ///
    /// Every piece is `piece_length` bytes except the last, which covers
    /// whatever remains of the total length.
    pub fn piece_len(&self, index: usize) -> u64 {
        if index + 1 < self.pieces.len() {
            self.piece_length
        } else {
            self.total_length - (self.pieces.len() as u64 - 1) * self.piece_length
        }
    }

    /// Get the expected hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Compute the info hash from the raw info dictionary bytes
    pub fn compute_info_hash(info_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        hasher.finalize().into()
    }

    /// Split the `info.pieces` blob into 20-byte hashes.
    ///
    /// Fails if the blob length is not a multiple of 20.
    pub fn split_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::parse_error(format!(
                "pieces length {} is not a multiple of 20",
                pieces_bytes.len()
            ))
            .into());
        }

        Ok(pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    /// Check the piece-count / total-length invariant:
    /// `count * piece_length >= total_length > (count - 1) * piece_length`.
    pub fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(
                TorrentError::validation_error("piece length must be positive").into(),
            );
        }

        let count = self.pieces.len() as u64;
        if count * self.piece_length < self.total_length {
            return Err(TorrentError::validation_error(format!(
                "{} pieces of {} bytes cannot cover {} bytes",
                count, self.piece_length, self.total_length
            ))
            .into());
        }
        if count == 0 || self.total_length <= (count - 1) * self.piece_length {
            return Err(TorrentError::validation_error(format!(
                "{} pieces is too many for {} bytes",
                count, self.total_length
            ))
            .into());
        }

        Ok(())
    }
}
