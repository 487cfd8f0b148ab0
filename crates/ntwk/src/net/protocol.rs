use rkyv::{Archive, Deserialize, Serialize, rancor};
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4E54574B;
pub const SERVER_DEFAULT_PORT: u16 = 16464;
pub const CLIENT_DEFAULT_PORT: u16 = 16462;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ServerInfo {
    pub id: [u8; 16],
    pub name: String,
    pub is_private: bool,
    pub connected_peers: u32,
    pub max_peers: u32,
}

impl ServerInfo {
    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        app_id: String,
        protocol_version: u32,
        peer_id: [u8; 16],
        name: String,
    },
    ConnectionAccepted {
        server: ServerInfo,
    },
    ConnectionDenied {
        reason: String,
    },
    Ping {
        timestamp_ms: u64,
    },
    Pong {
        timestamp_ms: u64,
    },
    Data(Vec<u8>),
    Disconnect {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    /// Encodes into `out`, replacing its contents.
    pub fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), PacketError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)?;
        out.clear();
        out.extend_from_slice(&bytes);
        Ok(())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}
