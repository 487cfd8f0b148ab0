pub mod net;
pub mod peer;
pub mod session;

pub use net::{
    CLIENT_DEFAULT_PORT, ClientProfile, ConfigResult, ConfigValidator, NetworkStats, PacketPool,
    PeerConfig, PeerProfile, PROTOCOL_VERSION, REFRESH_CEILING, SERVER_DEFAULT_PORT,
    ServerProfile,
};
pub use peer::{
    ClientPeer, ConnectionState, DisconnectReason, Peer, PeerError, PeerEvent, PeerRole,
    PeerStatus, ServerPeer,
};
pub use session::{SessionRegistry, SessionSettings};
