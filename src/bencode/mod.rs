//! Bencode codec module
//!
//! Decodes and canonically re-encodes the bencode grammar used by
//! .torrent metainfo files.

pub mod decode;
pub mod encode;

// Re-export main types
pub use decode::{decode, decode_prefix, Malformed, Value};
pub use encode::encode;
