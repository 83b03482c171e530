//! BitTorrent wire protocol module
//!
//! Implements the 68-byte handshake and the length-prefixed peer messages.

pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use handshake::{generate_peer_id, Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use message::{Message, MessageId};
pub use wire::{PeerWire, WireProtocol};
