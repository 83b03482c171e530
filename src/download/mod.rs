//! Download module
//!
//! The coordinator that distributes piece work across peer sessions, and
//! the writer that persists verified pieces into the output layout.

pub mod manager;
pub mod writer;

// Re-export main types
pub use manager::{CompletedPiece, DownloadManager, DownloadState};
pub use writer::PieceWriter;
