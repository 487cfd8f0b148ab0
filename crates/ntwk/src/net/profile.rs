use std::net::{IpAddr, SocketAddr};
use std::ops::{Deref, DerefMut};

use uuid::Uuid;

/// Number of unanswered refreshes after which a profile is stale.
pub const REFRESH_CEILING: u32 = 4;

const LATENCY_ALPHA: f32 = 0.125;

/// Bookkeeping for one remote peer as seen by the local session.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerProfile {
    id: Uuid,
    name: String,
    address: IpAddr,
    port: u16,
    endpoint: SocketAddr,
    protocol_version: u32,
    latency_ms: Option<f32>,
    session_key: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    refresh_attempts: u32,
}

impl PeerProfile {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        address: IpAddr,
        port: u16,
        protocol_version: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            port,
            endpoint: SocketAddr::new(address, port),
            protocol_version,
            latency_ms: None,
            session_key: None,
            public_key: None,
            refresh_attempts: 0,
        }
    }

    pub fn from_endpoint(
        id: Uuid,
        name: impl Into<String>,
        endpoint: SocketAddr,
        protocol_version: u32,
    ) -> Self {
        Self::new(id, name, endpoint.ip(), endpoint.port(), protocol_version)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn latency_ms(&self) -> Option<f32> {
        self.latency_ms
    }

    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    pub fn set_session_key(&mut self, key: Vec<u8>) {
        self.session_key = Some(key);
    }

    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    pub fn set_public_key(&mut self, key: Vec<u8>) {
        self.public_key = Some(key);
    }

    pub fn refresh_attempts(&self) -> u32 {
        self.refresh_attempts
    }

    pub fn is_stale(&self) -> bool {
        self.refresh_attempts >= REFRESH_CEILING
    }

    /// Counts one more unanswered refresh.
    ///
    /// Returns `false` once the ceiling is reached; the counter saturates
    /// there and the profile stays stale for good. Owners evict the peer and
    /// build a new profile to reconnect.
    pub fn refresh(&mut self) -> bool {
        self.refresh_attempts = (self.refresh_attempts + 1).min(REFRESH_CEILING);
        self.refresh_attempts < REFRESH_CEILING
    }

    /// Folds a round-trip sample into the smoothed latency.
    pub fn record_latency(&mut self, sample_ms: f32) {
        self.latency_ms = Some(match self.latency_ms {
            Some(srtt) => (1.0 - LATENCY_ALPHA) * srtt + LATENCY_ALPHA * sample_ms,
            None => sample_ms,
        });
    }

    /// A fresh live profile for the same peer, keeping identity, keys and
    /// latency. Returns `None` for a stale profile.
    pub fn renewed(&self) -> Option<Self> {
        if self.is_stale() {
            return None;
        }
        Some(Self {
            refresh_attempts: 0,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientProfile(PeerProfile);

impl ClientProfile {
    pub fn new(profile: PeerProfile) -> Self {
        Self(profile)
    }

    pub fn into_inner(self) -> PeerProfile {
        self.0
    }
}

impl Deref for ClientProfile {
    type Target = PeerProfile;

    fn deref(&self) -> &PeerProfile {
        &self.0
    }
}

impl DerefMut for ClientProfile {
    fn deref_mut(&mut self) -> &mut PeerProfile {
        &mut self.0
    }
}

/// A server as seen by a client. The peer counts are a snapshot taken when
/// the profile was built and are not kept current.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerProfile {
    profile: PeerProfile,
    pub is_private: bool,
    connected_peers: u32,
    max_peers: u32,
}

impl ServerProfile {
    pub fn new(profile: PeerProfile, is_private: bool, connected_peers: u32, max_peers: u32) -> Self {
        Self {
            profile,
            is_private,
            connected_peers,
            max_peers,
        }
    }

    pub fn connected_peers(&self) -> u32 {
        self.connected_peers
    }

    pub fn max_peers(&self) -> u32 {
        self.max_peers
    }

    pub fn is_full(&self) -> bool {
        self.connected_peers >= self.max_peers
    }

    pub fn into_inner(self) -> PeerProfile {
        self.profile
    }
}

impl Deref for ServerProfile {
    type Target = PeerProfile;

    fn deref(&self) -> &PeerProfile {
        &self.profile
    }
}

impl DerefMut for ServerProfile {
    fn deref_mut(&mut self) -> &mut PeerProfile {
        &mut self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn profile() -> PeerProfile {
        PeerProfile::new(
            Uuid::new_v4(),
            "alpha",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            16464,
            1,
        )
    }

    #[test]
    fn test_endpoint_is_derived() {
        let profile = profile();
        assert_eq!(
            profile.endpoint(),
            "127.0.0.1:16464".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(profile.refresh_attempts(), 0);
        assert!(profile.latency_ms().is_none());
    }

    #[test]
    fn test_refresh_ceiling() {
        let mut profile = profile();

        assert!(profile.refresh());
        assert!(profile.refresh());
        assert!(profile.refresh());
        assert!(!profile.refresh());
        assert_eq!(profile.refresh_attempts(), 4);
        assert!(profile.is_stale());
    }

    #[test]
    fn test_refresh_saturates_past_ceiling() {
        let mut profile = profile();
        for _ in 0..4 {
            profile.refresh();
        }

        for _ in 0..10 {
            assert!(!profile.refresh());
        }
        assert_eq!(profile.refresh_attempts(), REFRESH_CEILING);
    }

    #[test]
    fn test_renewed_resets_live_profile_only() {
        let mut profile = profile();
        profile.set_session_key(vec![7; 32]);
        profile.refresh();
        profile.refresh();

        let renewed = profile.renewed().unwrap();
        assert_eq!(renewed.refresh_attempts(), 0);
        assert_eq!(renewed.id(), profile.id());
        assert_eq!(renewed.session_key(), Some(&[7u8; 32][..]));

        profile.refresh();
        profile.refresh();
        assert!(profile.renewed().is_none());
    }

    #[test]
    fn test_latency_smoothing() {
        let mut profile = profile();
        profile.record_latency(100.0);
        assert_eq!(profile.latency_ms(), Some(100.0));

        profile.record_latency(20.0);
        let latency = profile.latency_ms().unwrap();
        assert!((latency - 90.0).abs() < 0.001);
    }

    #[test]
    fn test_server_profile_counts() {
        let mut server = ServerProfile::new(profile(), false, 4, 4);
        assert!(server.is_full());

        server.is_private = true;
        assert!(server.is_private);
        assert!(server.refresh());
        assert_eq!(server.name(), "alpha");
    }
}
