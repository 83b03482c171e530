//! Piece bitfields
//!
//! Bit-indexed piece ownership, MSB-first within each byte. Used both for
//! remote peers' advertised pieces and for the coordinator's completion
//! bitmap.

use anyhow::Result;

use crate::error::TorrentError;

/// A fixed-width bit vector over piece indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
    nbits: usize,
}

impl Bitfield {
    /// Create an all-zero bitfield for `nbits` pieces
    pub fn new(nbits: usize) -> Self {
        Self {
            bytes: vec![0u8; nbits.div_ceil(8)],
            nbits,
        }
    }

    /// Build a bitfield from a peer's `bitfield` message payload.
    ///
    /// The payload must be exactly `ceil(nbits / 8)` bytes and its trailing
    /// padding bits must be zero; anything else rejects the peer.
    pub fn from_payload(payload: Vec<u8>, nbits: usize) -> Result<Self> {
        let expected = nbits.div_ceil(8);
        if payload.len() != expected {
            return Err(TorrentError::validation_error(format!(
                "bitfield has {} bytes, expected {}",
                payload.len(),
                expected
            ))
            .into());
        }

        if nbits % 8 != 0 {
            let padding = payload[expected - 1] & (0xffu8 >> (nbits % 8));
            if padding != 0 {
                return Err(TorrentError::validation_error(
                    "bitfield has nonzero padding bits",
                )
                .into());
            }
        }

        Ok(Self {
            bytes: payload,
            nbits,
        })
    }

    /// Check whether bit `index` is set
    pub fn has(&self, index: usize) -> bool {
        if index >= self.nbits {
            return false;
        }
        self.bytes[index / 8] >> (7 - index % 8) & 1 == 1
    }

    /// Set bit `index`
    pub fn set(&mut self, index: usize) {
        if index < self.nbits {
            self.bytes[index / 8] |= 1 << (7 - index % 8);
        }
    }

    /// Clear bit `index`
    pub fn clear(&mut self, index: usize) {
        if index < self.nbits {
            self.bytes[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Number of addressable bits
    pub fn len(&self) -> usize {
        self.nbits
    }

    /// True if no bits are addressable
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }
}
