//! Peer module
//!
//! Peer endpoints and their sources, piece bitfields, and the per-peer
//! download session.

pub mod bitfield;
pub mod session;
pub mod source;

// Re-export main types
pub use bitfield::Bitfield;
pub use session::{PeerSession, SessionContext, BLOCK_SIZE, MAX_BACKLOG};
pub use source::{merge_sources, PeerEndpoint, PeerSource};
