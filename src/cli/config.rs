//! Process-wide configuration
//!
//! Built once at the program entry point and passed down by reference;
//! nothing here changes during a download.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::error::TorrentError;
use crate::protocol::generate_peer_id;

/// Immutable configuration for one run of the leecher.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory the output layout is created under
    pub output_dir: PathBuf,
    /// Trackers are asked for at least this many peers per announce
    pub min_peers: usize,
    /// Listen port advertised to trackers
    pub port: u16,
    /// Per-I/O deadline for tracker connect and announce exchanges
    pub tracker_connect_timeout: Duration,
    /// TCP connect deadline for peer handshakes
    pub handshake_timeout: Duration,
    /// Read deadline for the handshake response and initial bitfield
    pub handshake_read_timeout: Duration,
    /// Per-read deadline while downloading a piece
    pub piece_read_timeout: Duration,
    /// Floor for the re-announce interval trackers return
    pub default_tracker_interval: Duration,
    /// Upper bound on concurrent tracker announce loops
    pub max_tracker_connections: usize,
    /// Consecutive hash failures before a peer session is dropped
    pub max_peer_failures: u32,
    /// Peers requested per announce
    pub num_want: u32,
    /// Peer ID generated once per process
    pub peer_id: [u8; 20],
}

impl Config {
    /// Build the configuration with the defaults this client ships.
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            min_peers: 10,
            port: 6881,
            tracker_connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(20),
            handshake_read_timeout: Duration::from_secs(10),
            piece_read_timeout: Duration::from_secs(30),
            default_tracker_interval: Duration::from_secs(1800),
            max_tracker_connections: 20,
            max_peer_failures: 3,
            num_want: 50,
            peer_id: generate_peer_id(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(
                TorrentError::config_error_with_field("Port cannot be 0", "port").into(),
            );
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field(
                "Output directory cannot be empty",
                "output_dir",
            )
            .into());
        }
        if self.max_tracker_connections == 0 {
            return Err(TorrentError::config_error_with_field(
                "At least one tracker connection is required",
                "max_tracker_connections",
            )
            .into());
        }
        if self.max_peer_failures == 0 {
            return Err(TorrentError::config_error_with_field(
                "Peers need at least one failure before being dropped",
                "max_peer_failures",
            )
            .into());
        }
        Ok(())
    }

    /// numwant sent to trackers; never below the minimum peer count.
    pub fn effective_num_want(&self) -> u32 {
        self.num_want.max(self.min_peers as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/tmp/downloads"));

        assert_eq!(config.min_peers, 10);
        assert_eq!(config.port, 6881);
        assert_eq!(config.tracker_connect_timeout, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(20));
        assert_eq!(config.handshake_read_timeout, Duration::from_secs(10));
        assert_eq!(config.piece_read_timeout, Duration::from_secs(30));
        assert_eq!(config.default_tracker_interval, Duration::from_secs(1800));
        assert_eq!(config.max_tracker_connections, 20);
        assert_eq!(config.max_peer_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_peer_id_shape() {
        let config = Config::new(PathBuf::from("/tmp"));
        assert_eq!(&config.peer_id[..8], b"-CLOVER-");
        assert_eq!(config.peer_id.len(), 20);
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::new(PathBuf::from("/tmp"));
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_output_dir() {
        let config = Config::new(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_num_want_respects_min_peers() {
        let mut config = Config::new(PathBuf::from("/tmp"));
        config.num_want = 5;
        config.min_peers = 10;
        assert_eq!(config.effective_num_want(), 10);

        config.num_want = 50;
        assert_eq!(config.effective_num_want(), 50);
    }
}
