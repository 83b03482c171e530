//! Torrent file parser
//!
//! Decodes a .torrent file and interprets the metainfo dictionary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};
use url::Url;

use crate::bencode::{self, Value};
use crate::error::TorrentError;
use crate::torrent::info::{TorrentFile, TorrentInfo};

type Dict = BTreeMap<Vec<u8>, Value>;

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &Path) -> Result<TorrentInfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            TorrentError::storage_error_full(
                "Failed to read torrent file",
                path.display().to_string(),
                e.to_string(),
            )
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        let root = bencode::decode(data).map_err(TorrentError::from)?;
        let root = root
            .as_dict()
            .ok_or_else(|| TorrentError::parse_error("top-level value must be a dictionary"))?;

        let info_dict = root
            .get(b"info".as_slice())
            .and_then(Value::as_dict)
            .ok_or_else(|| TorrentError::parse_error("missing required field: info"))?;

        let name = required_string(info_dict, b"name")?;

        let piece_length = info_dict
            .get(b"piece length".as_slice())
            .and_then(Value::as_int)
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                TorrentError::parse_error("missing or non-positive field: info.piece length")
            })? as u64;

        let pieces_blob = info_dict
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| TorrentError::parse_error("missing required field: info.pieces"))?;
        let pieces = TorrentInfo::split_piece_hashes(pieces_blob)?;

        let (files, total_length, multi_file) = parse_file_table(info_dict)?;

        // The info hash is the SHA1 of the exact bytes the torrent author
        // wrote, so hash the raw span rather than a re-encoding.
        let (span_start, span_end) = info_span(data)?;
        let info_hash = TorrentInfo::compute_info_hash(&data[span_start..span_end]);

        let torrent = TorrentInfo {
            announce_list: parse_announce_list(root),
            info_hash,
            name: name.clone(),
            piece_length,
            total_length,
            pieces,
            files,
            multi_file,
            created_by: optional_string(root, b"created by"),
            creation_date: root.get(b"creation date".as_slice()).and_then(Value::as_int),
            comment: optional_string(root, b"comment"),
            encoding: optional_string(root, b"encoding"),
        };
        torrent.validate()?;

        info!(
            "Parsed torrent {} ({} pieces, {} bytes, {} trackers)",
            torrent.name,
            torrent.piece_count(),
            torrent.total_length,
            torrent.announce_list.len()
        );
        Ok(torrent)
    }
}

/// Locate the byte span of the `info` value inside the top-level dictionary.
fn info_span(data: &[u8]) -> Result<(usize, usize)> {
    if data.first() != Some(&b'd') {
        return Err(TorrentError::parse_error("top-level value must be a dictionary").into());
    }

    let mut pos = 1;
    while data.get(pos).is_some_and(|&b| b != b'e') {
        let (key, key_end) = bencode::decode_prefix(data, pos).map_err(TorrentError::from)?;
        let (_, value_end) =
            bencode::decode_prefix(data, key_end).map_err(TorrentError::from)?;
        if key.as_bytes() == Some(b"info".as_slice()) {
            return Ok((key_end, value_end));
        }
        pos = value_end;
    }

    Err(TorrentError::parse_error("missing required field: info").into())
}

/// Flatten the file list with cumulative offsets.
///
/// Exactly one of `info.length` (single-file) or `info.files` (multi-file)
/// must be present.
fn parse_file_table(info_dict: &Dict) -> Result<(Vec<TorrentFile>, u64, bool)> {
    let length = info_dict.get(b"length".as_slice());
    let files = info_dict.get(b"files".as_slice());

    match (length, files) {
        (Some(_), Some(_)) => {
            Err(TorrentError::parse_error("info has both length and files").into())
        }
        (Some(value), None) => {
            let length = value
                .as_int()
                .filter(|&n| n >= 0)
                .ok_or_else(|| TorrentError::parse_error("invalid field: info.length"))?
                as u64;
            let table = vec![TorrentFile {
                path: Vec::new(),
                length,
                offset: 0,
            }];
            Ok((table, length, false))
        }
        (None, Some(value)) => {
            let entries = value
                .as_list()
                .ok_or_else(|| TorrentError::parse_error("info.files must be a list"))?;

            let mut table = Vec::with_capacity(entries.len());
            let mut offset = 0u64;
            for entry in entries {
                let entry = entry
                    .as_dict()
                    .ok_or_else(|| TorrentError::parse_error("file entry must be a dictionary"))?;

                let length = entry
                    .get(b"length".as_slice())
                    .and_then(Value::as_int)
                    .filter(|&n| n >= 0)
                    .ok_or_else(|| {
                        TorrentError::parse_error("missing required field: file length")
                    })? as u64;

                let path_list = entry
                    .get(b"path".as_slice())
                    .and_then(Value::as_list)
                    .filter(|components| !components.is_empty())
                    .ok_or_else(|| {
                        TorrentError::parse_error("missing required field: file path")
                    })?;

                let mut path = Vec::with_capacity(path_list.len());
                for component in path_list {
                    let bytes = component.as_bytes().ok_or_else(|| {
                        TorrentError::parse_error("file path component must be a string")
                    })?;
                    path.push(String::from_utf8_lossy(bytes).to_string());
                }

                table.push(TorrentFile {
                    path,
                    length,
                    offset,
                });
                offset += length;
            }
            Ok((table, offset, true))
        }
        (None, None) => {
            Err(TorrentError::parse_error("info has neither length nor files").into())
        }
    }
}

/// Collect UDP tracker endpoints from `announce-list`.
///
/// Tiers are flattened in order; only `udp://` entries are retained, stored
/// as `host:port`. Entries with other schemes or without a port are skipped.
fn parse_announce_list(root: &Dict) -> Vec<String> {
    let mut trackers = Vec::new();

    let Some(tiers) = root.get(b"announce-list".as_slice()).and_then(Value::as_list) else {
        return trackers;
    };

    for tier in tiers {
        let Some(urls) = tier.as_list() else {
            continue;
        };
        for url_value in urls {
            let Some(bytes) = url_value.as_bytes() else {
                continue;
            };
            let raw = String::from_utf8_lossy(bytes);
            match Url::parse(&raw) {
                Ok(url) if url.scheme() == "udp" => {
                    let (Some(host), Some(port)) = (url.host_str(), url.port()) else {
                        warn!("Skipping tracker without host:port: {}", raw);
                        continue;
                    };
                    let endpoint = format!("{}:{}", host, port);
                    if !trackers.contains(&endpoint) {
                        trackers.push(endpoint);
                    }
                }
                Ok(_) => debug!("Skipping non-UDP tracker: {}", raw),
                Err(e) => warn!("Skipping unparseable tracker URL {}: {}", raw, e),
            }
        }
    }

    trackers
}

fn required_string(dict: &Dict, key: &[u8]) -> Result<String> {
    dict.get(key)
        .and_then(Value::as_bytes)
        .map(|bytes| String::from_utf8_lossy(bytes).to_string())
        .ok_or_else(|| {
            TorrentError::parse_error(format!(
                "missing required field: {}",
                String::from_utf8_lossy(key)
            ))
            .into()
        })
}

fn optional_string(dict: &Dict, key: &[u8]) -> Option<String> {
    dict.get(key)
        .and_then(Value::as_bytes)
        .map(|bytes| String::from_utf8_lossy(bytes).to_string())
}
