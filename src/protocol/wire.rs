//! Wire protocol framing
//!
//! Reads and writes handshakes and length-prefixed messages over any
//! async byte stream.

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{Handshake, Message, HANDSHAKE_LEN};
use crate::error::TorrentError;

/// Upper bound on a single frame body.
///
/// The largest legitimate frames are a 16 KiB piece block and the bitfield
/// of a very large torrent; anything bigger is a misbehaving peer.
const MAX_FRAME_LEN: usize = 1 << 20;

/// WireProtocol trait for stream framing
pub trait WireProtocol {
    /// Read a complete message from the stream
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message>;

    /// Write a message to the stream
    async fn write_message<W: AsyncWriteExt + Unpin>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> Result<()>;

    /// Read a handshake from the stream
    async fn read_handshake<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R)
        -> Result<Handshake>;

    /// Write a handshake to the stream
    async fn write_handshake<W: AsyncWriteExt + Unpin>(
        &mut self,
        writer: &mut W,
        handshake: &Handshake,
    ) -> Result<()>;
}

/// Default implementation of WireProtocol
pub struct PeerWire;

impl WireProtocol for PeerWire {
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message> {
        let mut length_buf = [0u8; 4];
        reader.read_exact(&mut length_buf).await?;
        let length = u32::from_be_bytes(length_buf) as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if length > MAX_FRAME_LEN {
            return Err(TorrentError::protocol_error_with_source(
                "Frame too large",
                format!("{} bytes", length),
            )
            .into());
        }

        let mut frame = vec![0u8; 4 + length];
        frame[..4].copy_from_slice(&length_buf);
        reader.read_exact(&mut frame[4..]).await?;

        Message::deserialize(&frame)
    }

    async fn write_message<W: AsyncWriteExt + Unpin>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> Result<()> {
        writer.write_all(&message.serialize()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_handshake<R: AsyncReadExt + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Handshake> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        reader.read_exact(&mut buf).await?;
        Handshake::deserialize(&buf)
    }

    async fn write_handshake<W: AsyncWriteExt + Unpin>(
        &mut self,
        writer: &mut W,
        handshake: &Handshake,
    ) -> Result<()> {
        writer.write_all(&handshake.serialize()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_round_trip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut wire = PeerWire;

        let message = Message::Request {
            index: 3,
            begin: 16384,
            length: 16384,
        };
        wire.write_message(&mut client, &message).await.unwrap();

        let read = wire.read_message(&mut server).await.unwrap();
        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn test_keepalive_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut wire = PeerWire;

        wire.write_message(&mut client, &Message::KeepAlive)
            .await
            .unwrap();
        assert_eq!(
            wire.read_message(&mut server).await.unwrap(),
            Message::KeepAlive
        );
    }

    #[tokio::test]
    async fn test_handshake_round_trip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut wire = PeerWire;

        let handshake = Handshake::new([5u8; 20], [6u8; 20]);
        wire.write_handshake(&mut client, &handshake).await.unwrap();

        let read = wire.read_handshake(&mut server).await.unwrap();
        assert_eq!(read.info_hash, handshake.info_hash);
        assert_eq!(read.peer_id, handshake.peer_id);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut wire = PeerWire;

        client
            .write_all(&((MAX_FRAME_LEN as u32 + 1).to_be_bytes()))
            .await
            .unwrap();

        assert!(wire.read_message(&mut server).await.is_err());
    }
}
