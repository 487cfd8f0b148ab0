use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

use super::event::{DisconnectReason, PeerEvent};
use super::{Peer, PeerError, PeerRole, PeerStatus, heartbeat_interval, now_ms};
use crate::net::{
    ClientProfile, NetworkEndpoint, NetworkStats, Packet, PacketPool, PacketType, PeerConfig,
    PeerProfile, PROTOCOL_VERSION, SERVER_DEFAULT_PORT, ServerInfo, ServerProfile,
};

pub struct ServerPeer {
    id: Uuid,
    name: String,
    config: PeerConfig,
    pool: PacketPool<Vec<u8>>,
    endpoint: Option<NetworkEndpoint>,
    status: PeerStatus,
    is_private: bool,
    clients: HashMap<SocketAddr, ClientProfile>,
    since_heartbeat: Duration,
    events: VecDeque<PeerEvent>,
}

impl ServerPeer {
    pub fn new(config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self {
        let name = format!("{}-server", config.app_id());
        Self::with_name(name, config, pool)
    }

    pub fn with_name(name: impl Into<String>, config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            config,
            pool,
            endpoint: None,
            status: PeerStatus::NotRunning,
            is_private: false,
            clients: HashMap::new(),
            since_heartbeat: Duration::ZERO,
            events: VecDeque::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn pool(&self) -> &PacketPool<Vec<u8>> {
        &self.pool
    }

    pub fn set_private(&mut self, is_private: bool) {
        self.is_private = is_private;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().map(|e| e.local_addr())
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        self.endpoint.as_ref().map(|e| e.stats())
    }

    pub fn connected(&self) -> impl Iterator<Item = &ClientProfile> {
        self.clients.values()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, peer_id: Uuid) -> Option<&ClientProfile> {
        self.clients.values().find(|c| c.id() == peer_id)
    }

    /// How this server describes itself to connecting clients.
    pub fn profile(&self) -> ServerProfile {
        let endpoint = self
            .local_addr()
            .unwrap_or_else(|| self.config.local_endpoint());
        ServerProfile::new(
            PeerProfile::from_endpoint(self.id, self.name.clone(), endpoint, PROTOCOL_VERSION),
            self.is_private,
            self.clients.len() as u32,
            self.config.max_connections() as u32,
        )
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn send_to(&mut self, peer_id: Uuid, payload: Vec<u8>) -> Result<(), PeerError> {
        let addr = self
            .client(peer_id)
            .map(|c| c.endpoint())
            .ok_or(PeerError::NotConnected)?;
        self.send(PacketType::Data(payload), addr)
    }

    pub fn broadcast(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        let addrs: Vec<SocketAddr> = self.clients.keys().copied().collect();
        for addr in addrs {
            let mut buffer = self.pool.get_cleared();
            buffer.extend_from_slice(payload);
            self.send(PacketType::Data(buffer), addr)?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self, peer_id: Uuid, message: &str) -> Result<bool, PeerError> {
        let Some(addr) = self.client(peer_id).map(|c| c.endpoint()) else {
            return Ok(false);
        };
        self.send(
            PacketType::Disconnect {
                message: message.to_string(),
            },
            addr,
        )?;
        self.clients.remove(&addr);
        self.events.push_back(PeerEvent::Disconnected {
            peer_id,
            reason: DisconnectReason::Shutdown,
        });
        Ok(true)
    }

    fn send(&mut self, payload: PacketType, addr: SocketAddr) -> Result<(), PeerError> {
        let endpoint = self.endpoint.as_mut().ok_or(PeerError::NotRunning)?;
        endpoint.send_to(payload, addr)?;
        Ok(())
    }

    fn info(&self) -> ServerInfo {
        ServerInfo {
            id: *self.id.as_bytes(),
            name: self.name.clone(),
            is_private: self.is_private,
            connected_peers: self.clients.len() as u32,
            max_peers: self.config.max_connections() as u32,
        }
    }

    fn pump(&mut self) -> Result<(), PeerError> {
        let packets = match self.endpoint.as_mut() {
            Some(endpoint) => endpoint.receive()?,
            None => return Ok(()),
        };

        // Keep handling the batch and report the first failure.
        let mut first_error = None;
        for (packet, addr) in packets {
            if let Err(e) = self.handle_packet(packet, addr) {
                log::warn!("Failed to answer {}: {}", addr, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Result<(), PeerError> {
        match packet.payload {
            PacketType::ConnectionRequest {
                app_id,
                protocol_version,
                peer_id,
                name,
            } => self.handle_connection_request(addr, &app_id, protocol_version, peer_id, name),
            PacketType::Ping { timestamp_ms } => {
                if self.clients.contains_key(&addr) {
                    self.send(PacketType::Pong { timestamp_ms }, addr)?;
                }
                Ok(())
            }
            PacketType::Pong { timestamp_ms } => {
                if let Some(client) = self.clients.get_mut(&addr) {
                    if let Some(renewed) = client.renewed() {
                        *client = ClientProfile::new(renewed);
                    }
                    client.record_latency(now_ms().saturating_sub(timestamp_ms) as f32);
                }
                Ok(())
            }
            PacketType::Data(payload) => {
                if let Some(client) = self.clients.get(&addr) {
                    self.events.push_back(PeerEvent::Data {
                        peer_id: client.id(),
                        payload,
                    });
                }
                Ok(())
            }
            PacketType::Disconnect { message } => {
                if let Some(client) = self.clients.remove(&addr) {
                    log::info!("Client {} disconnected: {}", client.name(), message);
                    self.events.push_back(PeerEvent::Disconnected {
                        peer_id: client.id(),
                        reason: DisconnectReason::Remote(message),
                    });
                }
                Ok(())
            }
            other => {
                log::debug!("Ignoring unexpected packet from {}: {:?}", addr, other);
                Ok(())
            }
        }
    }

    fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        app_id: &str,
        protocol_version: u32,
        peer_id: [u8; 16],
        name: String,
    ) -> Result<(), PeerError> {
        // A repeated request means our acceptance was lost.
        if self.clients.contains_key(&addr) {
            let server = self.info();
            return self.send(PacketType::ConnectionAccepted { server }, addr);
        }

        let denial = if app_id != self.config.app_id() {
            Some("Wrong application identifier")
        } else if protocol_version != PROTOCOL_VERSION {
            Some("Protocol version mismatch")
        } else if self.clients.len() >= self.config.max_connections() {
            Some("Server full")
        } else {
            None
        };

        if let Some(reason) = denial {
            log::info!("Denied connection from {}: {}", addr, reason);
            self.send(
                PacketType::ConnectionDenied {
                    reason: reason.to_string(),
                },
                addr,
            )?;
            self.events.push_back(PeerEvent::ConnectionDenied {
                addr,
                reason: reason.to_string(),
            });
            return Ok(());
        }

        let profile = PeerProfile::from_endpoint(Uuid::from_bytes(peer_id), name, addr, protocol_version);
        let peer_id = profile.id();
        let client_name = profile.name().to_string();
        self.clients.insert(addr, ClientProfile::new(profile));

        let server = self.info();
        if let Err(e) = self.send(PacketType::ConnectionAccepted { server }, addr) {
            self.clients.remove(&addr);
            return Err(e);
        }
        log::info!("Client {} connected from {}", client_name, addr);
        self.events.push_back(PeerEvent::Connected { peer_id, addr });
        Ok(())
    }

    fn heartbeat(&mut self, delta: Duration) -> Result<(), PeerError> {
        self.since_heartbeat += delta;
        if self.since_heartbeat < heartbeat_interval(self.config.timeout()) {
            return Ok(());
        }
        self.since_heartbeat = Duration::ZERO;

        let mut stale = Vec::new();
        let mut live = Vec::new();
        for (addr, client) in self.clients.iter_mut() {
            if client.refresh() {
                live.push(*addr);
            } else {
                stale.push(*addr);
            }
        }

        for addr in stale {
            if let Some(client) = self.clients.remove(&addr) {
                log::warn!("Evicting unresponsive client {} ({})", client.name(), addr);
                if let Err(e) = self.send(
                    PacketType::Disconnect {
                        message: DisconnectReason::Stale.as_str().to_string(),
                    },
                    addr,
                ) {
                    log::debug!("Failed to notify evicted client {}: {}", addr, e);
                }
                self.events.push_back(PeerEvent::Disconnected {
                    peer_id: client.id(),
                    reason: DisconnectReason::Stale,
                });
            }
        }

        let timestamp_ms = now_ms();
        let mut first_error = None;
        for addr in live {
            if let Err(e) = self.send(PacketType::Ping { timestamp_ms }, addr) {
                log::warn!("Failed to ping {}: {}", addr, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn finish_shutdown(&mut self) {
        self.endpoint = None;
        self.since_heartbeat = Duration::ZERO;
        self.status = PeerStatus::NotRunning;
        self.events.push_back(PeerEvent::Stopped);
        log::info!("Server {} stopped", self.name);
    }
}

impl Peer for ServerPeer {
    fn status(&self) -> PeerStatus {
        self.status
    }

    fn start(&mut self) -> Result<(), PeerError> {
        if self.status != PeerStatus::NotRunning {
            return Ok(());
        }

        self.status = PeerStatus::Starting;
        match NetworkEndpoint::bind(&self.config, self.pool.clone()) {
            Ok(endpoint) => {
                log::info!("Server {} listening on {}", self.name, endpoint.local_addr());
                self.endpoint = Some(endpoint);
                self.status = PeerStatus::Running;
                Ok(())
            }
            Err(e) => {
                self.status = PeerStatus::NotRunning;
                Err(e.into())
            }
        }
    }

    fn shutdown(&mut self, message: &str) -> Result<(), PeerError> {
        if self.endpoint.is_none() {
            return Err(PeerError::NotRunning);
        }

        let clients: Vec<(SocketAddr, Uuid)> =
            self.clients.iter().map(|(addr, c)| (*addr, c.id())).collect();
        self.clients.clear();

        for (addr, peer_id) in clients {
            if let Err(e) = self.send(
                PacketType::Disconnect {
                    message: message.to_string(),
                },
                addr,
            ) {
                log::warn!("Failed to notify {} of shutdown: {}", addr, e);
            }
            self.events.push_back(PeerEvent::Disconnected {
                peer_id,
                reason: DisconnectReason::Shutdown,
            });
        }

        self.status = PeerStatus::ShutdownRequested;
        Ok(())
    }

    fn update(&mut self, delta: Duration) -> Result<(), PeerError> {
        match self.status {
            PeerStatus::Running => {
                let pumped = self.pump();
                let heartbeat = self.heartbeat(delta);
                pumped.and(heartbeat)
            }
            PeerStatus::ShutdownRequested => {
                self.finish_shutdown();
                Ok(())
            }
            PeerStatus::NotRunning | PeerStatus::Starting => Ok(()),
        }
    }
}

impl PeerRole for ServerPeer {
    const DEFAULT_PORT: u16 = SERVER_DEFAULT_PORT;

    fn create(config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self {
        Self::new(config, pool)
    }
}
