//! Peer endpoint sources
//!
//! The download coordinator consumes a single stream of candidate peer
//! endpoints. Producers (the UDP tracker manager today, a DHT node
//! tomorrow) implement [`PeerSource`] and are fanned in by
//! [`merge_sources`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A candidate peer endpoint as discovered by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Dedup key used by the coordinator
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Endpoints a tracker fills with zeros carry no usable address.
    pub fn is_unspecified(&self) -> bool {
        self.ip.is_unspecified() || self.port == 0
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A producer of candidate peer endpoints.
#[async_trait]
pub trait PeerSource: Send {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Start producing endpoints until `cancel` fires. The returned
    /// receiver closes when the source has nothing more to offer.
    async fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<PeerEndpoint>>;
}

/// Fan several endpoint streams into one.
///
/// One forwarder task per input stream shares the merged sender; the
/// merged receiver closes once every input has ended or `cancel` fires,
/// signalling end-of-stream to the consumer.
pub fn merge_sources(
    streams: Vec<mpsc::Receiver<PeerEndpoint>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<PeerEndpoint> {
    let (tx, rx) = mpsc::channel(64);

    for mut stream in streams {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    endpoint = stream.recv() => {
                        match endpoint {
                            Some(endpoint) => {
                                if tx.send(endpoint).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("peer source forwarder exiting");
        });
    }

    rx
}
