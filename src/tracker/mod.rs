//! UDP tracker module
//!
//! Implements the BEP-15 connect/announce exchanges and the per-tracker
//! announce loops that feed peer endpoints to the download coordinator.

pub mod client;
pub mod manager;
pub mod packet;

// Re-export main types
pub use client::TrackerClient;
pub use manager::TrackerManager;
pub use packet::{
    AnnounceEvent, AnnounceRequest, AnnounceResponse, ConnectRequest, ConnectResponse,
};
