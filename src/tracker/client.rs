//! Single-tracker UDP client
//!
//! Owns one connected UDP socket and drives the BEP-15 connect and
//! announce exchanges against it.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::TorrentError;
use crate::tracker::packet::{AnnounceRequest, AnnounceResponse, ConnectRequest, ConnectResponse};

/// Connection ids are only honored for a couple of minutes; refresh ours
/// well before that when re-announcing.
const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

/// A connected UDP tracker.
pub struct TrackerClient {
    url: String,
    socket: UdpSocket,
    connection_id: u64,
    connected_at: Instant,
    read_timeout: Duration,
}

impl TrackerClient {
    /// Resolve `host:port`, bind an ephemeral socket, and perform the
    /// connect exchange.
    pub async fn connect(url: &str, read_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(url).await.map_err(|e| {
            TorrentError::TrackerError {
                message: "Failed to resolve tracker".to_string(),
                url: Some(url.to_string()),
                source: Some(e.to_string()),
            }
        })?;

        let mut client = Self {
            url: url.to_string(),
            socket,
            connection_id: 0,
            connected_at: Instant::now(),
            read_timeout,
        };
        client.refresh_connection().await?;
        Ok(client)
    }

    /// Tracker address this client talks to
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn refresh_connection(&mut self) -> Result<()> {
        let transaction_id = rand::random();
        let request = ConnectRequest::new(transaction_id);

        self.socket.send(&request.encode()).await?;

        let mut buf = [0u8; 32];
        let n = timeout(self.read_timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| {
                TorrentError::tracker_error_with_url("Connect timed out", self.url.clone())
            })??;

        let response = ConnectResponse::decode(&buf[..n], transaction_id)?;
        self.connection_id = response.connection_id;
        self.connected_at = Instant::now();
        debug!("Connected to tracker {}", self.url);
        Ok(())
    }

    /// Send one announce and parse the response.
    ///
    /// The connection and transaction ids in `request` are filled in here;
    /// a stale connection id is refreshed first.
    pub async fn announce(&mut self, mut request: AnnounceRequest) -> Result<AnnounceResponse> {
        if self.connected_at.elapsed() >= CONNECTION_ID_TTL {
            trace!("Connection id for {} expired, reconnecting", self.url);
            self.refresh_connection().await?;
        }

        request.connection_id = self.connection_id;
        request.transaction_id = rand::random();

        self.socket.send(&request.encode()).await?;

        let mut buf = vec![0u8; 2048];
        let n = timeout(self.read_timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| {
                TorrentError::tracker_error_with_url("Announce timed out", self.url.clone())
            })??;

        AnnounceResponse::decode(&buf[..n], request.transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::packet::AnnounceEvent;

    /// Answer one connect and then announces forever, handing out a fixed
    /// peer list.
    async fn fake_tracker(socket: UdpSocket, connection_id: u64) {
        let mut buf = [0u8; 128];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let action = u32::from_be_bytes(buf[8..12].try_into().unwrap());
            if n == 16 && action == 0 {
                let transaction_id = &buf[12..16];
                let mut reply = Vec::new();
                reply.extend_from_slice(&0u32.to_be_bytes());
                reply.extend_from_slice(transaction_id);
                reply.extend_from_slice(&connection_id.to_be_bytes());
                socket.send_to(&reply, from).await.unwrap();
            } else if n == 98 {
                let transaction_id = &buf[12..16];
                let mut reply = Vec::new();
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(transaction_id);
                reply.extend_from_slice(&900u32.to_be_bytes());
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(&[127, 0, 0, 1]);
                reply.extend_from_slice(&6881u16.to_be_bytes());
                socket.send_to(&reply, from).await.unwrap();
            }
        }
    }

    fn announce_request() -> AnnounceRequest {
        AnnounceRequest {
            connection_id: 0,
            transaction_id: 0,
            info_hash: [1u8; 20],
            peer_id: [2u8; 20],
            downloaded: 0,
            left: 1000,
            uploaded: 0,
            event: AnnounceEvent::Started,
            ip: 0,
            key: 42,
            num_want: 50,
            port: 6881,
        }
    }

    #[tokio::test]
    async fn test_connect_and_announce() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(fake_tracker(server, 0xfeed_beef));

        let mut client = TrackerClient::connect(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.connection_id, 0xfeed_beef);

        let response = client.announce(announce_request()).await.unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].to_string(), "127.0.0.1:6881");
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_tracker() {
        // Bound but never answered.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let result =
            TrackerClient::connect(&addr.to_string(), Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
