//! Error types for the torrent leecher
//!
//! This module defines the error taxonomy shared by all components:
//! malformed input is fatal at startup, everything network-facing is
//! recoverable per tracker or per peer.

use std::fmt;

/// Error type covering every component of the leecher.
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Metainfo / bencode parsing errors
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// BitTorrent wire protocol errors (framing, payload sizes, handshake)
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Peer session errors
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// UDP tracker errors (transaction mismatch, tracker-side error packets)
    TrackerError {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// File I/O and output layout errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Socket-level network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Validation errors (bad piece index, bitfield shape, ...)
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new ParseError
    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ParseError with source
    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError
    pub fn peer_error(message: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new TrackerError
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new TrackerError with tracker URL
    pub fn tracker_error_with_url(message: impl Into<String>, url: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: None,
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError with address
    pub fn network_error_with_address(
        message: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

fn write_tagged(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    message: &str,
    pairs: &[(&str, &Option<String>)],
) -> fmt::Result {
    write!(f, "{} error: {}", kind, message)?;
    let present: Vec<String> = pairs
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}: {}", name, v)))
        .collect();
    if !present.is_empty() {
        write!(f, " ({})", present.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::ParseError { message, source } => {
                write_tagged(f, "Parse", message, &[("source", source)])
            }
            TorrentError::ProtocolError { message, source } => {
                write_tagged(f, "Protocol", message, &[("source", source)])
            }
            TorrentError::PeerError {
                message,
                peer,
                source,
            } => write_tagged(f, "Peer", message, &[("peer", peer), ("source", source)]),
            TorrentError::TrackerError {
                message,
                url,
                source,
            } => write_tagged(f, "Tracker", message, &[("url", url), ("source", source)]),
            TorrentError::StorageError {
                message,
                path,
                source,
            } => write_tagged(f, "Storage", message, &[("path", path), ("source", source)]),
            TorrentError::NetworkError {
                message,
                address,
                source,
            } => write_tagged(
                f,
                "Network",
                message,
                &[("address", address), ("source", source)],
            ),
            TorrentError::ConfigError { message, field } => {
                write_tagged(f, "Config", message, &[("field", field)])
            }
            TorrentError::ValidationError { message, field } => {
                write_tagged(f, "Validation", message, &[("field", field)])
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::StorageError {
            message: err.to_string(),
            path: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::NetworkError {
            message: "Failed to parse address".to_string(),
            address: None,
            source: Some(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::NetworkError {
            message: "Operation timed out".to_string(),
            address: None,
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        let err = TorrentError::parse_error("Invalid torrent file");
        assert_eq!(err.to_string(), "Parse error: Invalid torrent file");
    }

    #[test]
    fn test_parse_error_with_source() {
        let err = TorrentError::parse_error_with_source("Invalid torrent file", "bencode error");
        assert!(err.to_string().contains("Parse error"));
        assert!(err.to_string().contains("bencode error"));
    }

    #[test]
    fn test_peer_error_with_peer() {
        let err = TorrentError::peer_error_with_peer("Connection failed", "127.0.0.1:6881");
        assert!(err.to_string().contains("Peer error"));
        assert!(err.to_string().contains("127.0.0.1:6881"));
    }

    #[test]
    fn test_tracker_error_with_url() {
        let err = TorrentError::tracker_error_with_url("announce failed", "tracker.example:1337");
        assert!(err.to_string().contains("Tracker error"));
        assert!(err.to_string().contains("tracker.example:1337"));
    }

    #[test]
    fn test_storage_error_full() {
        let err = TorrentError::storage_error_full("File not found", "/path/to/file", "NotFound");
        assert!(err.to_string().contains("Storage error"));
        assert!(err.to_string().contains("/path/to/file"));
        assert!(err.to_string().contains("NotFound"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: TorrentError = io_err.into();
        assert!(matches!(err, TorrentError::StorageError { .. }));
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: TorrentError = addr_err.into();
        assert!(matches!(err, TorrentError::NetworkError { .. }));
    }

    #[test]
    fn test_validation_error() {
        let err = TorrentError::validation_error("bitfield has wrong length");
        assert!(err.to_string().contains("Validation error"));
    }
}
