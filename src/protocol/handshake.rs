//! BitTorrent handshake
//!
//! The fixed 68-byte message exchanged in both directions immediately
//! after the TCP connection is established.

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Length of the protocol string
const PROTOCOL_LENGTH: u8 = 19;

/// Total handshake size in bytes
pub const HANDSHAKE_LEN: usize = 68;

/// Fixed peer-id prefix identifying this client
const PEER_ID_PREFIX: &[u8; 8] = b"-CLOVER-";

/// BitTorrent handshake message
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Protocol identifier (19 bytes)
    pub protocol_id: [u8; 19],
    /// Reserved bytes (all zero; no extensions negotiated)
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Peer ID of the sender
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_id: PROTOCOL_STRING.as_bytes().try_into().unwrap(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serialize the handshake to its 68-byte wire form
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(&self.protocol_id);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize a handshake from its 68-byte wire form
    pub fn deserialize(data: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        if data[0] != PROTOCOL_LENGTH {
            return Err(TorrentError::protocol_error_with_source(
                "Invalid protocol length",
                format!("expected {}, got {}", PROTOCOL_LENGTH, data[0]),
            )
            .into());
        }

        let protocol_id: [u8; 19] = data[1..20].try_into().unwrap();
        if protocol_id != PROTOCOL_STRING.as_bytes() {
            return Err(TorrentError::protocol_error("Invalid protocol string").into());
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        debug!(
            "Deserialized handshake from peer {}",
            String::from_utf8_lossy(&peer_id)
        );
        Ok(Self {
            protocol_id,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check that the handshake carries the expected info hash
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> bool {
        if self.info_hash != *expected_info_hash {
            warn!(
                "Handshake info hash mismatch: expected {}, got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash)
            );
            return false;
        }
        true
    }
}

/// Generate the process-wide peer ID.
///
/// Fixed `-CLOVER-` prefix followed by 12 hex characters derived from 6
/// bytes of OS randomness.
pub fn generate_peer_id() -> [u8; 20] {
    let mut random = [0u8; 6];
    OsRng.fill_bytes(&mut random);

    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
    peer_id[8..].copy_from_slice(hex::encode(random).as_bytes());
    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_serialize_layout() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.serialize();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING.as_bytes());
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], &[2u8; 20]);
    }

    #[test]
    fn test_handshake_round_trip() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes: [u8; HANDSHAKE_LEN] = handshake.serialize().try_into().unwrap();

        let parsed = Handshake::deserialize(&bytes).unwrap();
        assert_eq!(parsed.info_hash, handshake.info_hash);
        assert_eq!(parsed.peer_id, handshake.peer_id);
        assert_eq!(parsed.reserved, [0u8; 8]);
    }

    #[test]
    fn test_handshake_rejects_bad_protocol() {
        let mut bytes: [u8; HANDSHAKE_LEN] =
            Handshake::new([1u8; 20], [2u8; 20]).serialize().try_into().unwrap();

        bytes[0] = 18;
        assert!(Handshake::deserialize(&bytes).is_err());

        bytes[0] = 19;
        bytes[5] = b'X';
        assert!(Handshake::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_handshake_validate() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(handshake.validate(&[1u8; 20]));
        assert!(!handshake.validate(&[3u8; 20]));
    }

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(&peer_id[..8], b"-CLOVER-");
        assert!(peer_id[8..].iter().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(&generate_peer_id()[8..], &peer_id[8..]);
    }
}
