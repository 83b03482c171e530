//! BEP-15 packet encoding and decoding
//!
//! The UDP tracker protocol is two request/response exchanges with
//! big-endian fixed layouts: connect (16-byte request) and announce
//! (98-byte request).

use std::net::Ipv4Addr;

use anyhow::Result;
use bytes::{Buf, BytesMut};

use crate::error::TorrentError;
use crate::peer::PeerEndpoint;

/// Magic constant identifying the UDP tracker protocol
const PROTOCOL_ID: u64 = 0x0417_2710_1980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Announce event field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AnnounceEvent {
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
}

/// Connect request: `protocol_id | action=0 | transaction_id`
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    pub transaction_id: u32,
}

impl ConnectRequest {
    pub fn new(transaction_id: u32) -> Self {
        Self { transaction_id }
    }

    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
        buf[12..16].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf
    }
}

/// Connect response: `action | transaction_id | connection_id`
#[derive(Debug, Clone, Copy)]
pub struct ConnectResponse {
    pub connection_id: u64,
}

impl ConnectResponse {
    /// Decode a connect response, checking the transaction id against the
    /// request's and `action == 3` tracker errors.
    pub fn decode(data: &[u8], expected_transaction_id: u32) -> Result<Self> {
        if data.len() < 16 {
            return Err(TorrentError::tracker_error(format!(
                "connect response too short: {} bytes",
                data.len()
            ))
            .into());
        }

        let mut buf = BytesMut::from(data);
        let action = buf.get_u32();
        let transaction_id = buf.get_u32();

        if action == ACTION_ERROR {
            return Err(TorrentError::tracker_error(error_message(&buf)).into());
        }
        if action != ACTION_CONNECT {
            return Err(
                TorrentError::tracker_error(format!("unexpected action {}", action)).into(),
            );
        }
        if transaction_id != expected_transaction_id {
            return Err(TorrentError::tracker_error(format!(
                "transaction id mismatch: sent {}, got {}",
                expected_transaction_id, transaction_id
            ))
            .into());
        }

        Ok(Self {
            connection_id: buf.get_u64(),
        })
    }
}

/// Announce request: the fixed 98-byte BEP-15 layout
#[derive(Debug, Clone, Copy)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: AnnounceEvent,
    pub ip: u32,
    pub key: u32,
    pub num_want: u32,
    pub port: u16,
}

impl AnnounceRequest {
    pub fn encode(&self) -> [u8; 98] {
        let mut buf = [0u8; 98];
        buf[0..8].copy_from_slice(&self.connection_id.to_be_bytes());
        buf[8..12].copy_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        buf[12..16].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[16..36].copy_from_slice(&self.info_hash);
        buf[36..56].copy_from_slice(&self.peer_id);
        buf[56..64].copy_from_slice(&self.downloaded.to_be_bytes());
        buf[64..72].copy_from_slice(&self.left.to_be_bytes());
        buf[72..80].copy_from_slice(&self.uploaded.to_be_bytes());
        buf[80..84].copy_from_slice(&(self.event as u32).to_be_bytes());
        buf[84..88].copy_from_slice(&self.ip.to_be_bytes());
        buf[88..92].copy_from_slice(&self.key.to_be_bytes());
        buf[92..96].copy_from_slice(&self.num_want.to_be_bytes());
        buf[96..98].copy_from_slice(&self.port.to_be_bytes());
        buf
    }
}

/// Announce response: header plus N compact `ip:port` peer entries
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<PeerEndpoint>,
}

impl AnnounceResponse {
    /// Decode an announce response, checking the transaction id against
    /// the request's and `action == 3` tracker errors.
    pub fn decode(data: &[u8], expected_transaction_id: u32) -> Result<Self> {
        if data.len() < 8 {
            return Err(TorrentError::tracker_error(format!(
                "announce response too short: {} bytes",
                data.len()
            ))
            .into());
        }

        let mut buf = BytesMut::from(data);
        let action = buf.get_u32();
        let transaction_id = buf.get_u32();

        if action == ACTION_ERROR {
            return Err(TorrentError::tracker_error(error_message(&buf)).into());
        }
        if action != ACTION_ANNOUNCE {
            return Err(
                TorrentError::tracker_error(format!("unexpected action {}", action)).into(),
            );
        }
        if transaction_id != expected_transaction_id {
            return Err(TorrentError::tracker_error(format!(
                "transaction id mismatch: sent {}, got {}",
                expected_transaction_id, transaction_id
            ))
            .into());
        }
        if buf.remaining() < 12 {
            return Err(TorrentError::tracker_error(format!(
                "announce response too short: {} bytes",
                data.len()
            ))
            .into());
        }

        let interval = buf.get_u32();
        let leechers = buf.get_u32();
        let seeders = buf.get_u32();

        // IPv4 entries only; a short trailing fragment is ignored.
        let mut peers = Vec::with_capacity(buf.remaining() / 6);
        while buf.remaining() >= 6 {
            let ip = Ipv4Addr::from(buf.get_u32());
            let port = buf.get_u16();
            peers.push(PeerEndpoint::new(ip, port));
        }

        Ok(Self {
            interval,
            leechers,
            seeders,
            peers,
        })
    }
}

fn error_message(buf: &BytesMut) -> String {
    let text = String::from_utf8_lossy(buf);
    if text.is_empty() {
        "tracker returned error".to_string()
    } else {
        format!("tracker returned error: {}", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_layout() {
        let packet = ConnectRequest::new(0xdead_beef).encode();
        assert_eq!(&packet[0..8], &0x0417_2710_1980u64.to_be_bytes());
        assert_eq!(&packet[8..12], &[0, 0, 0, 0]);
        assert_eq!(&packet[12..16], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_connect_response_round_trip() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(&0x1122_3344_5566_7788u64.to_be_bytes());

        let response = ConnectResponse::decode(&data, 7).unwrap();
        assert_eq!(response.connection_id, 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_connect_response_rejects_transaction_mismatch() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(&1u64.to_be_bytes());

        assert!(ConnectResponse::decode(&data, 7).is_err());
    }

    #[test]
    fn test_connect_response_rejects_tracker_error() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(b"torrent not registered");

        let err = ConnectResponse::decode(&data, 7).unwrap_err();
        assert!(err.to_string().contains("torrent not registered"));
    }

    #[test]
    fn test_announce_request_layout() {
        let request = AnnounceRequest {
            connection_id: 0x0102_0304_0506_0708,
            transaction_id: 0x0a0b_0c0d,
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            downloaded: 100,
            left: 200,
            uploaded: 50,
            event: AnnounceEvent::Started,
            ip: 0,
            key: 0xcafe_f00d,
            num_want: 50,
            port: 6881,
        };
        let packet = request.encode();

        assert_eq!(packet.len(), 98);
        assert_eq!(&packet[0..8], &0x0102_0304_0506_0708u64.to_be_bytes());
        assert_eq!(&packet[8..12], &1u32.to_be_bytes());
        assert_eq!(&packet[12..16], &0x0a0b_0c0du32.to_be_bytes());
        assert_eq!(&packet[16..36], &[1u8; 20]);
        assert_eq!(&packet[36..56], &[2u8; 20]);
        assert_eq!(&packet[56..64], &100u64.to_be_bytes());
        assert_eq!(&packet[64..72], &200u64.to_be_bytes());
        assert_eq!(&packet[72..80], &50u64.to_be_bytes());
        assert_eq!(&packet[80..84], &2u32.to_be_bytes());
        assert_eq!(&packet[84..88], &[0, 0, 0, 0]);
        assert_eq!(&packet[88..92], &0xcafe_f00du32.to_be_bytes());
        assert_eq!(&packet[92..96], &50u32.to_be_bytes());
        assert_eq!(&packet[96..98], &6881u16.to_be_bytes());
    }

    #[test]
    fn test_announce_response_parses_peers() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&9u32.to_be_bytes());
        data.extend_from_slice(&1800u32.to_be_bytes());
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&12u32.to_be_bytes());
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&6881u16.to_be_bytes());
        data.extend_from_slice(&[192, 168, 1, 2]);
        data.extend_from_slice(&51413u16.to_be_bytes());

        let response = AnnounceResponse::decode(&data, 9).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.leechers, 3);
        assert_eq!(response.seeders, 12);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].to_string(), "10.0.0.1:6881");
        assert_eq!(response.peers[1].to_string(), "192.168.1.2:51413");
    }

    #[test]
    fn test_announce_response_without_peers() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&9u32.to_be_bytes());
        data.extend_from_slice(&900u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());

        let response = AnnounceResponse::decode(&data, 9).unwrap();
        assert!(response.peers.is_empty());
    }

    #[test]
    fn test_announce_response_rejects_truncated_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&9u32.to_be_bytes());
        data.extend_from_slice(&900u32.to_be_bytes());

        assert!(AnnounceResponse::decode(&data, 9).is_err());
    }
}
