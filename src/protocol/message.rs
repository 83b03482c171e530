//! BitTorrent protocol messages
//!
//! Typed encode/decode of the length-prefixed peer wire messages:
//! `length (u32, big-endian) | id (u8) | payload`. A length of zero is a
//! keep-alive with no id byte.

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};

use crate::error::TorrentError;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl MessageId {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageId::Choke),
            1 => Some(MessageId::Unchoke),
            2 => Some(MessageId::Interested),
            3 => Some(MessageId::NotInterested),
            4 => Some(MessageId::Have),
            5 => Some(MessageId::Bitfield),
            6 => Some(MessageId::Request),
            7 => Some(MessageId::Piece),
            8 => Some(MessageId::Cancel),
            9 => Some(MessageId::Port),
            _ => None,
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port { listen_port: u16 },
    /// A message with an id this client does not implement. Sessions log
    /// these and move on rather than closing the connection.
    Unknown { id: u8 },
}

impl Message {
    /// Get the message ID (None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::Port { .. } => Some(MessageId::Port),
            Message::Unknown { .. } => None,
        }
    }

    /// Length of `id | payload`, excluding the length prefix
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
            Message::Port { .. } => 3,
            Message::Unknown { .. } => 1,
        }
    }

    /// Serialize the message including its length prefix
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(MessageId::Choke as u8),
            Message::Unchoke => buf.put_u8(MessageId::Unchoke as u8),
            Message::Interested => buf.put_u8(MessageId::Interested as u8),
            Message::NotInterested => buf.put_u8(MessageId::NotInterested as u8),
            Message::Have { piece_index } => {
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bitfield);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port { listen_port } => {
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*listen_port);
            }
            Message::Unknown { id } => buf.put_u8(*id),
        }

        buf.to_vec()
    }

    /// Deserialize a message from bytes including the length prefix.
    ///
    /// Payload sizes are validated against the id: fixed-size ids must
    /// match exactly, bitfield and piece are variable. Unrecognized ids
    /// decode to [`Message::Unknown`].
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::from(data);

        if buf.remaining() < 4 {
            return Err(TorrentError::protocol_error("Message missing length prefix").into());
        }

        let length = buf.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if buf.remaining() != length {
            return Err(TorrentError::protocol_error_with_source(
                "Message body does not match length prefix",
                format!("prefix {}, body {}", length, buf.remaining()),
            )
            .into());
        }

        let id = buf.get_u8();
        let Some(message_id) = MessageId::from_u8(id) else {
            return Ok(Message::Unknown { id });
        };

        let payload_len = buf.remaining();
        let expect_exact = |expected: usize| -> Result<()> {
            if payload_len != expected {
                return Err(TorrentError::protocol_error_with_source(
                    "Invalid payload length",
                    format!(
                        "id {:?} expects {} bytes, got {}",
                        message_id, expected, payload_len
                    ),
                )
                .into());
            }
            Ok(())
        };

        match message_id {
            MessageId::Choke => {
                expect_exact(0)?;
                Ok(Message::Choke)
            }
            MessageId::Unchoke => {
                expect_exact(0)?;
                Ok(Message::Unchoke)
            }
            MessageId::Interested => {
                expect_exact(0)?;
                Ok(Message::Interested)
            }
            MessageId::NotInterested => {
                expect_exact(0)?;
                Ok(Message::NotInterested)
            }
            MessageId::Have => {
                expect_exact(4)?;
                Ok(Message::Have {
                    piece_index: buf.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield {
                bitfield: buf.to_vec(),
            }),
            MessageId::Request => {
                expect_exact(12)?;
                Ok(Message::Request {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload_len < 8 {
                    return Err(TorrentError::protocol_error_with_source(
                        "Invalid payload length",
                        format!("piece expects at least 8 bytes, got {}", payload_len),
                    )
                    .into());
                }
                Ok(Message::Piece {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    block: buf.to_vec(),
                })
            }
            MessageId::Cancel => {
                expect_exact(12)?;
                Ok(Message::Cancel {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
            MessageId::Port => {
                expect_exact(2)?;
                Ok(Message::Port {
                    listen_port: buf.get_u16(),
                })
            }
        }
    }
}
