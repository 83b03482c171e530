//! Piece writer
//!
//! Builds the output file layout up front, pre-allocates every file, and
//! maps verified pieces onto positional writes.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::TorrentError;
use crate::torrent::TorrentInfo;

/// An open output file covering one interval of the content.
struct OutputFile {
    path: PathBuf,
    /// Content interval `[start, end)` this file holds
    start: u64,
    end: u64,
    handle: File,
}

/// Writes verified pieces into the pre-allocated output layout.
///
/// Handles stay open for the download's lifetime; writes are positional,
/// so writes to different files never contend on shared seek state.
pub struct PieceWriter {
    torrent: Arc<TorrentInfo>,
    files: Vec<OutputFile>,
}

impl PieceWriter {
    /// Create the output layout under `download_root`.
    ///
    /// Single-file torrents become `<root>/<name>`; multi-file torrents a
    /// `<root>/<name>/` tree. Every file is created and truncated to its
    /// declared length. A failure here removes whatever was partially
    /// created and is fatal to the download.
    pub fn new(download_root: &Path, torrent: Arc<TorrentInfo>) -> Result<Self> {
        let root = download_root.join(&torrent.name);

        match Self::build_layout(download_root, &root, &torrent) {
            Ok(files) => {
                info!(
                    "Pre-allocated {} file(s) under {}",
                    files.len(),
                    root.display()
                );
                Ok(Self { torrent, files })
            }
            Err(e) => {
                if root.is_dir() {
                    let _ = fs::remove_dir_all(&root);
                } else {
                    let _ = fs::remove_file(&root);
                }
                Err(e)
            }
        }
    }

    fn build_layout(
        download_root: &Path,
        root: &Path,
        torrent: &TorrentInfo,
    ) -> Result<Vec<OutputFile>> {
        let mut files = Vec::with_capacity(torrent.files.len());

        if torrent.multi_file {
            fs::create_dir_all(root).map_err(|e| layout_error(root, e))?;

            for file in &torrent.files {
                let mut full = root.to_path_buf();
                for component in &file.path {
                    full.push(component);
                }
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(|e| layout_error(parent, e))?;
                }
                let handle = create_preallocated(&full, file.length)?;
                let (start, end) = file.span();
                files.push(OutputFile {
                    path: full,
                    start,
                    end,
                    handle,
                });
            }
        } else {
            fs::create_dir_all(download_root).map_err(|e| layout_error(download_root, e))?;
            let handle = create_preallocated(root, torrent.total_length)?;
            files.push(OutputFile {
                path: root.to_path_buf(),
                start: 0,
                end: torrent.total_length,
                handle,
            });
        }

        Ok(files)
    }

    /// Write one verified piece into every file its interval overlaps.
    pub fn write_piece(&self, index: u32, data: &[u8]) -> Result<()> {
        let expected = self.torrent.piece_len(index as usize);
        if data.len() as u64 != expected {
            return Err(TorrentError::validation_error(format!(
                "piece {} buffer is {} bytes, expected {}",
                index,
                data.len(),
                expected
            ))
            .into());
        }

        let piece_start = index as u64 * self.torrent.piece_length;
        let piece_end = piece_start + data.len() as u64;

        for file in &self.files {
            if file.end <= piece_start || file.start >= piece_end {
                continue;
            }

            let write_start = piece_start.max(file.start);
            let write_end = piece_end.min(file.end);
            let chunk = &data[(write_start - piece_start) as usize..(write_end - piece_start) as usize];

            write_all_at(&file.handle, chunk, write_start - file.start).map_err(|e| {
                TorrentError::storage_error_full(
                    format!("Failed to write piece {}", index),
                    file.path.display().to_string(),
                    e.to_string(),
                )
            })?;
        }

        debug!("Wrote piece {} ({} bytes)", index, data.len());
        Ok(())
    }
}

fn create_preallocated(path: &Path, length: u64) -> Result<File> {
    let handle = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| layout_error(path, e))?;
    handle.set_len(length).map_err(|e| layout_error(path, e))?;
    Ok(handle)
}

fn layout_error(path: &Path, err: std::io::Error) -> anyhow::Error {
    TorrentError::storage_error_full(
        "Failed to create output layout",
        path.display().to_string(),
        err.to_string(),
    )
    .into()
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let written = file.seek_write(buf, offset)?;
        buf = &buf[written..];
        offset += written as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    use crate::torrent::TorrentFile;

    fn single_file_torrent(name: &str, piece_length: u64, total: u64) -> TorrentInfo {
        let piece_count = total.div_ceil(piece_length) as usize;
        TorrentInfo {
            announce_list: Vec::new(),
            info_hash: [0u8; 20],
            name: name.to_string(),
            piece_length,
            total_length: total,
            pieces: vec![[0u8; 20]; piece_count],
            files: vec![TorrentFile {
                path: Vec::new(),
                length: total,
                offset: 0,
            }],
            multi_file: false,
            created_by: None,
            creation_date: None,
            comment: None,
            encoding: None,
        }
    }

    fn multi_file_torrent(name: &str, piece_length: u64, lengths: &[(Vec<&str>, u64)]) -> TorrentInfo {
        let mut files = Vec::new();
        let mut offset = 0u64;
        for (path, length) in lengths {
            files.push(TorrentFile {
                path: path.iter().map(|s| s.to_string()).collect(),
                length: *length,
                offset,
            });
            offset += length;
        }
        let piece_count = offset.div_ceil(piece_length) as usize;
        TorrentInfo {
            announce_list: Vec::new(),
            info_hash: [0u8; 20],
            name: name.to_string(),
            piece_length,
            total_length: offset,
            pieces: vec![[0u8; 20]; piece_count],
            files,
            multi_file: true,
            created_by: None,
            creation_date: None,
            comment: None,
            encoding: None,
        }
    }

    #[test]
    fn test_single_file_preallocation() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = single_file_torrent("f.bin", 16384, 20000);

        let _writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();

        let metadata = fs::metadata(dir.path().join("f.bin")).unwrap();
        assert_eq!(metadata.len(), 20000);
    }

    #[test]
    fn test_single_file_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = single_file_torrent("f.bin", 16384, 16384);
        let writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();

        let data: Vec<u8> = (0..16384u32).map(|i| (i % 256) as u8).collect();
        writer.write_piece(0, &data).unwrap();

        let on_disk = fs::read(dir.path().join("f.bin")).unwrap();
        assert_eq!(Sha1::digest(&on_disk), Sha1::digest(&data));
    }

    #[test]
    fn test_last_piece_short() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = single_file_torrent("f.bin", 16384, 20000);
        let writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();

        writer.write_piece(0, &vec![0xaa; 16384]).unwrap();
        writer.write_piece(1, &vec![0xbb; 3616]).unwrap();

        let on_disk = fs::read(dir.path().join("f.bin")).unwrap();
        assert_eq!(on_disk.len(), 20000);
        assert!(on_disk[..16384].iter().all(|&b| b == 0xaa));
        assert!(on_disk[16384..].iter().all(|&b| b == 0xbb));
    }

    #[test]
    fn test_piece_straddles_file_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = multi_file_torrent(
            "pack",
            16384,
            &[(vec!["a"], 10000), (vec!["b"], 10000)],
        );
        let writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();

        let data: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
        writer.write_piece(0, &data).unwrap();

        let a = fs::read(dir.path().join("pack/a")).unwrap();
        let b = fs::read(dir.path().join("pack/b")).unwrap();

        assert_eq!(a.len(), 10000);
        assert_eq!(&a[..], &data[..10000]);

        assert_eq!(b.len(), 10000);
        assert_eq!(&b[..6384], &data[10000..]);
        // The rest of b is still its pre-allocated zero bytes.
        assert!(b[6384..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_nested_paths_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = multi_file_torrent("pack", 16384, &[(vec!["x", "y", "z.bin"], 16384)]);

        let _writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();
        assert!(dir.path().join("pack/x/y/z.bin").exists());
    }

    #[test]
    fn test_wrong_piece_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = single_file_torrent("f.bin", 16384, 20000);
        let writer = PieceWriter::new(dir.path(), Arc::new(torrent)).unwrap();

        // Piece 1 is 3616 bytes, not a full 16384.
        assert!(writer.write_piece(1, &vec![0u8; 16384]).is_err());
    }

    #[test]
    fn test_failed_construction_removes_partial_root() {
        let dir = tempfile::tempdir().unwrap();
        // Block the second file's directory with a plain file.
        let torrent = multi_file_torrent(
            "pack",
            16384,
            &[(vec!["ok.bin"], 16384), (vec!["blocked", "f.bin"], 16384)],
        );
        fs::create_dir_all(dir.path().join("pack")).unwrap();
        fs::write(dir.path().join("pack/blocked"), b"in the way").unwrap();

        assert!(PieceWriter::new(dir.path(), Arc::new(torrent)).is_err());
        assert!(!dir.path().join("pack").exists());
    }
}
