use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::event::{DisconnectReason, PeerEvent};
use super::{Peer, PeerError, PeerRole, PeerStatus, heartbeat_interval, now_ms};
use crate::net::{
    CLIENT_DEFAULT_PORT, NetworkEndpoint, NetworkStats, Packet, PacketPool, PacketType,
    PeerConfig, PeerProfile, PROTOCOL_VERSION, ServerInfo, ServerProfile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct ClientPeer {
    id: Uuid,
    name: String,
    config: PeerConfig,
    pool: PacketPool<Vec<u8>>,
    endpoint: Option<NetworkEndpoint>,
    status: PeerStatus,
    connection: ConnectionState,
    remote: Option<SocketAddr>,
    connect_started: Option<Instant>,
    server: Option<ServerProfile>,
    since_heartbeat: Duration,
    events: VecDeque<PeerEvent>,
}

impl ClientPeer {
    pub fn new(config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self {
        let name = format!("{}-client", config.app_id());
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
            connection: ConnectionState::Disconnected,
            remote: None,
            connect_started: None,
            server: None,
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

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().map(|e| e.local_addr())
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        self.endpoint.as_ref().map(|e| e.stats())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// The server this client is connected to, once accepted.
    pub fn server(&self) -> Option<&ServerProfile> {
        self.server.as_ref()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), PeerError> {
        if self.endpoint.is_none() {
            return Err(PeerError::NotRunning);
        }

        log::info!("Connecting to {}", remote);

        self.reset_connection();
        self.remote = Some(remote);
        self.connection = ConnectionState::Connecting;
        self.connect_started = Some(Instant::now());

        self.send_connection_request()
    }

    pub fn disconnect(&mut self, message: &str) -> Result<(), PeerError> {
        if self.connection == ConnectionState::Connected {
            self.send(PacketType::Disconnect {
                message: message.to_string(),
            })?;
            if let Some(server) = &self.server {
                self.events.push_back(PeerEvent::Disconnected {
                    peer_id: server.id(),
                    reason: DisconnectReason::Shutdown,
                });
            }
        }

        self.reset_connection();
        Ok(())
    }

    pub fn send_data(&mut self, payload: Vec<u8>) -> Result<(), PeerError> {
        if self.connection != ConnectionState::Connected {
            self.pool.recycle(payload);
            return Err(PeerError::NotConnected);
        }
        self.send(PacketType::Data(payload))
    }

    fn reset_connection(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.remote = None;
        self.connect_started = None;
        self.server = None;
        self.since_heartbeat = Duration::ZERO;
    }

    fn send(&mut self, payload: PacketType) -> Result<(), PeerError> {
        let remote = self.remote.ok_or(PeerError::NotConnected)?;
        let endpoint = self.endpoint.as_mut().ok_or(PeerError::NotRunning)?;
        endpoint.send_to(payload, remote)?;
        Ok(())
    }

    fn send_connection_request(&mut self) -> Result<(), PeerError> {
        self.send(PacketType::ConnectionRequest {
            app_id: self.config.app_id().to_string(),
            protocol_version: PROTOCOL_VERSION,
            peer_id: *self.id.as_bytes(),
            name: self.name.clone(),
        })
    }

    fn pump(&mut self) -> Result<(), PeerError> {
        let packets = match self.endpoint.as_mut() {
            Some(endpoint) => endpoint.receive()?,
            None => return Ok(()),
        };

        // Keep handling the batch and report the first failure.
        let mut first_error = None;
        for (packet, addr) in packets {
            if Some(addr) != self.remote {
                log::debug!("Ignoring packet from unknown sender {}", addr);
                continue;
            }
            if let Err(e) = self.handle_packet(packet, addr) {
                log::warn!("Failed to answer {}: {}", addr, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Result<(), PeerError> {
        match packet.payload {
            PacketType::ConnectionAccepted { server } => {
                if self.connection == ConnectionState::Connecting {
                    self.accept(server, addr);
                }
                Ok(())
            }
            PacketType::ConnectionDenied { reason } => {
                if self.connection == ConnectionState::Connecting {
                    log::warn!("Connection denied: {}", reason);
                    self.reset_connection();
                    self.events
                        .push_back(PeerEvent::ConnectionDenied { addr, reason });
                }
                Ok(())
            }
            PacketType::Ping { timestamp_ms } => {
                if self.connection == ConnectionState::Connected {
                    self.send(PacketType::Pong { timestamp_ms })?;
                }
                Ok(())
            }
            PacketType::Pong { timestamp_ms } => {
                if let Some(server) = self.server.as_mut() {
                    if let Some(renewed) = server.renewed() {
                        *server = ServerProfile::new(
                            renewed,
                            server.is_private,
                            server.connected_peers(),
                            server.max_peers(),
                        );
                    }
                    let rtt = now_ms().saturating_sub(timestamp_ms) as f32;
                    server.record_latency(rtt);
                    log::debug!("Ping RTT: {} ms", rtt);
                }
                Ok(())
            }
            PacketType::Data(payload) => {
                if let Some(server) = &self.server {
                    self.events.push_back(PeerEvent::Data {
                        peer_id: server.id(),
                        payload,
                    });
                }
                Ok(())
            }
            PacketType::Disconnect { message } => {
                if let Some(server) = self.server.take() {
                    log::info!("Disconnected by server: {}", message);
                    self.events.push_back(PeerEvent::Disconnected {
                        peer_id: server.id(),
                        reason: DisconnectReason::Remote(message),
                    });
                }
                self.reset_connection();
                Ok(())
            }
            PacketType::ConnectionRequest { .. } => {
                log::debug!("Ignoring connection request sent to a client");
                Ok(())
            }
        }
    }

    fn accept(&mut self, server: ServerInfo, addr: SocketAddr) {
        let peer_id = server.uuid();
        let profile = PeerProfile::from_endpoint(peer_id, server.name, addr, PROTOCOL_VERSION);
        log::info!("Connected to {} at {}", profile.name(), addr);

        self.server = Some(ServerProfile::new(
            profile,
            server.is_private,
            server.connected_peers,
            server.max_peers,
        ));
        self.connection = ConnectionState::Connected;
        self.connect_started = None;
        self.since_heartbeat = Duration::ZERO;
        self.events.push_back(PeerEvent::Connected { peer_id, addr });
    }

    fn heartbeat(&mut self, delta: Duration) -> Result<(), PeerError> {
        self.since_heartbeat += delta;
        let due = self.since_heartbeat >= heartbeat_interval(self.config.timeout());

        match self.connection {
            ConnectionState::Connecting => {
                let started = self.connect_started.unwrap_or_else(Instant::now);
                if started.elapsed() > self.config.timeout() {
                    log::warn!("Connection timeout");
                    let addr = self.remote;
                    self.reset_connection();
                    if let Some(addr) = addr {
                        self.events.push_back(PeerEvent::ConnectionTimedOut { addr });
                    }
                } else if due {
                    self.since_heartbeat = Duration::ZERO;
                    self.send_connection_request()?;
                }
                Ok(())
            }
            ConnectionState::Connected if due => {
                self.since_heartbeat = Duration::ZERO;
                let live = self.server.as_mut().is_some_and(|s| s.refresh());
                if live {
                    return self.send(PacketType::Ping {
                        timestamp_ms: now_ms(),
                    });
                }

                log::warn!("Server connection lost");
                if let Err(e) = self.send(PacketType::Disconnect {
                    message: DisconnectReason::Stale.as_str().to_string(),
                }) {
                    log::debug!("Failed to notify server of lost connection: {}", e);
                }
                if let Some(server) = self.server.take() {
                    self.events.push_back(PeerEvent::Disconnected {
                        peer_id: server.id(),
                        reason: DisconnectReason::Stale,
                    });
                }
                self.reset_connection();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn finish_shutdown(&mut self) {
        self.endpoint = None;
        self.reset_connection();
        self.status = PeerStatus::NotRunning;
        self.events.push_back(PeerEvent::Stopped);
        log::info!("Client {} stopped", self.name);
    }
}

impl Peer for ClientPeer {
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
                log::info!("Client {} bound to {}", self.name, endpoint.local_addr());
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

        if let Err(e) = self.disconnect(message) {
            log::warn!("Failed to notify server of shutdown: {}", e);
            self.reset_connection();
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

impl PeerRole for ClientPeer {
    const DEFAULT_PORT: u16 = CLIENT_DEFAULT_PORT;

    fn create(config: PeerConfig, pool: PacketPool<Vec<u8>>) -> Self {
        Self::new(config, pool)
    }
}
