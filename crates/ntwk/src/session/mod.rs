use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::net::{
    ConfigValidator, DEFAULT_MAX_CONNECTIONS, DEFAULT_RECEIVE_BUFFER_SIZE,
    DEFAULT_SEND_BUFFER_SIZE, DEFAULT_TIMEOUT_SECS, PacketPool, PeerConfig,
};
use crate::peer::{ClientPeer, Peer, PeerError, PeerRole, PeerStatus, ServerPeer};

/// Transport parameters applied to every peer the registry constructs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_connections: usize,
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub timeout_secs: f32,
    pub pool_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pool_size: 64,
        }
    }
}

/// Owns the client and server peers of a process and gates their lifecycle
/// on each peer's current [`PeerStatus`].
///
/// Misuse (unknown id, duplicate id, wrong state) is reported as `false`.
/// Errors raised by a peer's own transport while starting, shutting down or
/// pumping are passed through unchanged.
pub struct SessionRegistry<C = ClientPeer, S = ServerPeer> {
    clients: HashMap<String, C>,
    servers: HashMap<String, S>,
    validator: ConfigValidator,
    settings: SessionSettings,
    pool: PacketPool<Vec<u8>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_settings(ConfigValidator::default(), SessionSettings::default())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Peer, S: Peer> SessionRegistry<C, S> {
    pub fn with_settings(validator: ConfigValidator, settings: SessionSettings) -> Self {
        let pool = PacketPool::for_buffers(settings.receive_buffer_size, settings.pool_size);
        Self {
            clients: HashMap::new(),
            servers: HashMap::new(),
            validator,
            settings,
            pool,
        }
    }

    pub fn pool(&self) -> &PacketPool<Vec<u8>> {
        &self.pool
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn insert_server(&mut self, id: &str, server: S) -> bool {
        insert_peer(&mut self.servers, id, server)
    }

    pub fn insert_client(&mut self, id: &str, client: C) -> bool {
        insert_peer(&mut self.clients, id, client)
    }

    pub fn server(&self, id: &str) -> Option<&S> {
        self.servers.get(id)
    }

    pub fn server_mut(&mut self, id: &str) -> Option<&mut S> {
        self.servers.get_mut(id)
    }

    pub fn client(&self, id: &str) -> Option<&C> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: &str) -> Option<&mut C> {
        self.clients.get_mut(id)
    }

    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn start_server(&mut self, id: &str) -> Result<bool, PeerError> {
        start_peer(&mut self.servers, id)
    }

    pub fn start_client(&mut self, id: &str) -> Result<bool, PeerError> {
        start_peer(&mut self.clients, id)
    }

    pub fn shutdown_server(&mut self, id: &str, message: &str) -> Result<bool, PeerError> {
        shutdown_peer(&mut self.servers, id, message)
    }

    pub fn shutdown_client(&mut self, id: &str, message: &str) -> Result<bool, PeerError> {
        shutdown_peer(&mut self.clients, id, message)
    }

    pub fn remove_server(&mut self, id: &str) -> bool {
        remove_peer(&mut self.servers, id)
    }

    pub fn remove_client(&mut self, id: &str) -> bool {
        remove_peer(&mut self.clients, id)
    }

    /// Pumps every running peer once. Peers that are stopping are pumped as
    /// well so they can finish closing; stopped peers are skipped. A failing
    /// peer does not stop the others, and the first failure is returned.
    pub fn update(&mut self, delta: Duration) -> Result<(), PeerError> {
        let mut first_error = None;
        for client in self.clients.values_mut().filter(|p| is_pumped(p.status())) {
            if let Err(e) = client.update(delta) {
                first_error.get_or_insert(e);
            }
        }
        for server in self.servers.values_mut().filter(|p| is_pumped(p.status())) {
            if let Err(e) = server.update(delta) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn build_config<P: PeerRole>(
        &self,
        app_id: &str,
        address: Option<IpAddr>,
        port: Option<u32>,
    ) -> Option<PeerConfig> {
        self.validator
            .validate(
                app_id,
                address,
                port.unwrap_or(u32::from(P::DEFAULT_PORT)),
                self.settings.max_connections,
                self.settings.receive_buffer_size,
                self.settings.send_buffer_size,
                self.settings.timeout_secs,
            )
            .into_config()
    }
}

impl<C: Peer, S: PeerRole> SessionRegistry<C, S> {
    /// Registers a new server under `id`. The server listens on `port`, or
    /// on [`crate::SERVER_DEFAULT_PORT`] when none is given.
    pub fn add_server(
        &mut self,
        id: &str,
        app_id: &str,
        address: Option<IpAddr>,
        port: Option<u32>,
    ) -> bool {
        if self.servers.contains_key(id) {
            log::debug!("Server {} already registered", id);
            return false;
        }
        let Some(config) = self.build_config::<S>(app_id, address, port) else {
            return false;
        };
        self.insert_server(id, S::create(config, self.pool.clone()))
    }
}

impl<C: PeerRole, S: Peer> SessionRegistry<C, S> {
    /// Registers a new client under `id`, bound to `port` or
    /// [`crate::CLIENT_DEFAULT_PORT`].
    pub fn add_client(
        &mut self,
        id: &str,
        app_id: &str,
        address: Option<IpAddr>,
        port: Option<u32>,
    ) -> bool {
        if self.clients.contains_key(id) {
            log::debug!("Client {} already registered", id);
            return false;
        }
        let Some(config) = self.build_config::<C>(app_id, address, port) else {
            return false;
        };
        self.insert_client(id, C::create(config, self.pool.clone()))
    }
}

fn is_pumped(status: PeerStatus) -> bool {
    matches!(status, PeerStatus::Running | PeerStatus::ShutdownRequested)
}

fn insert_peer<P>(peers: &mut HashMap<String, P>, id: &str, peer: P) -> bool {
    if peers.contains_key(id) {
        return false;
    }
    peers.insert(id.to_string(), peer);
    true
}

fn start_peer<P: Peer>(peers: &mut HashMap<String, P>, id: &str) -> Result<bool, PeerError> {
    let Some(peer) = peers.get_mut(id) else {
        return Ok(false);
    };
    if peer.status() != PeerStatus::NotRunning {
        log::debug!("Peer {} is {:?}, not starting", id, peer.status());
        return Ok(false);
    }

    peer.start()?;
    Ok(matches!(
        peer.status(),
        PeerStatus::Starting | PeerStatus::Running
    ))
}

fn shutdown_peer<P: Peer>(
    peers: &mut HashMap<String, P>,
    id: &str,
    message: &str,
) -> Result<bool, PeerError> {
    let Some(peer) = peers.get_mut(id) else {
        return Ok(false);
    };
    if peer.status() != PeerStatus::Running {
        log::debug!("Peer {} is {:?}, not shutting down", id, peer.status());
        return Ok(false);
    }

    peer.shutdown(message)?;
    Ok(matches!(
        peer.status(),
        PeerStatus::ShutdownRequested | PeerStatus::NotRunning
    ))
}

fn remove_peer<P: Peer>(peers: &mut HashMap<String, P>, id: &str) -> bool {
    match peers.get(id) {
        Some(peer) if peer.status() == PeerStatus::NotRunning => {
            peers.remove(id);
            true
        }
        Some(peer) => {
            log::warn!("Refusing to remove peer {} while {:?}", id, peer.status());
            false
        }
        None => false,
    }
}
