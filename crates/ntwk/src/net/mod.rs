mod config;
mod endpoint;
mod pool;
mod profile;
mod protocol;
mod stats;

pub use config::{
    ConfigError, ConfigResult, ConfigValidator, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SEND_BUFFER_SIZE, DEFAULT_TIMEOUT_SECS, GlobalLogger,
    MAX_PORT, MIN_PORT, PeerConfig,
};
pub use endpoint::NetworkEndpoint;
pub use pool::PacketPool;
pub use profile::{ClientProfile, PeerProfile, REFRESH_CEILING, ServerProfile};
pub use protocol::{
    CLIENT_DEFAULT_PORT, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketHeader,
    PacketType, SERVER_DEFAULT_PORT, ServerInfo,
};
pub use stats::NetworkStats;
