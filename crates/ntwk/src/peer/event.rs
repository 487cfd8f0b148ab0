use std::net::SocketAddr;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Connected {
        peer_id: Uuid,
        addr: SocketAddr,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    ConnectionTimedOut {
        addr: SocketAddr,
    },
    Disconnected {
        peer_id: Uuid,
        reason: DisconnectReason,
    },
    Data {
        peer_id: Uuid,
        payload: Vec<u8>,
    },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Remote(String),
    Stale,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::Remote(message) => message,
            DisconnectReason::Stale => "stopped answering heartbeats",
            DisconnectReason::Shutdown => "local shutdown",
        }
    }
}
