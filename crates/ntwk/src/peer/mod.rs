mod client;
mod event;
mod server;

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::net::{PacketError, PacketPool, PeerConfig, REFRESH_CEILING};

pub use client::{ClientPeer, ConnectionState};
pub use event::{DisconnectReason, PeerEvent};
pub use server::ServerPeer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerStatus {
    NotRunning,
    Starting,
    Running,
    ShutdownRequested,
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("packet of {size} bytes exceeds send buffer of {limit} bytes")]
    PacketTooLarge { size: usize, limit: usize },
    #[error("peer is not running")]
    NotRunning,
    #[error("peer is not connected")]
    NotConnected,
}

/// Capabilities the session registry drives on a peer.
pub trait Peer {
    fn status(&self) -> PeerStatus;

    fn start(&mut self) -> Result<(), PeerError>;

    /// Sends `message` to connected remotes and begins closing the socket.
    fn shutdown(&mut self, message: &str) -> Result<(), PeerError>;

    /// Message pump, called once per tick.
    fn update(&mut self, delta: Duration) -> Result<(), PeerError>;
}

/// A concrete peer kind the registry can construct on its own.
pub trait PeerRole: Peer + Sized {
    const DEFAULT_PORT: u16;

    fn create(config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self;
}

/// Heartbeats fit [`REFRESH_CEILING`] times into the connection timeout, so a
/// peer that stops answering goes stale after roughly one timeout.
pub(crate) fn heartbeat_interval(timeout: Duration) -> Duration {
    timeout / REFRESH_CEILING
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
