use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ntwk::net::{Packet, PacketHeader, PacketType, ServerInfo};
use ntwk::{
    ConfigValidator, ConnectionState, DisconnectReason, PacketPool, Peer, PeerError, PeerEvent,
    PeerStatus, PROTOCOL_VERSION, ServerPeer, SessionRegistry, SessionSettings,
};
use uuid::Uuid;

const APP_ID: &str = "ntwk-test";
const TICK: Duration = Duration::from_millis(16);

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn localhost() -> Option<IpAddr> {
    Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn encode(payload: PacketType) -> Vec<u8> {
    let mut buffer = Vec::new();
    Packet::new(PacketHeader::new(0), payload)
        .serialize_into(&mut buffer)
        .unwrap();
    buffer
}

fn connection_request(app_id: &str, name: &str) -> Vec<u8> {
    encode(PacketType::ConnectionRequest {
        app_id: app_id.to_string(),
        protocol_version: PROTOCOL_VERSION,
        peer_id: *Uuid::new_v4().as_bytes(),
        name: name.to_string(),
    })
}

/// Blocks on a raw socket for the next datagram.
fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    socket
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    let mut buffer = vec![0u8; 1408];
    let (size, from) = socket.recv_from(&mut buffer).unwrap();
    (Packet::deserialize(&buffer[..size]).unwrap(), from)
}

fn pump_until<F>(registry: &mut SessionRegistry, timeout_ms: u64, mut done: F) -> bool
where
    F: FnMut(&SessionRegistry) -> bool,
{
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        registry.update(TICK).unwrap();
        if done(registry) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Registers and starts a server plus one client, and connects them.
fn connected_pair(registry: &mut SessionRegistry) -> SocketAddr {
    let port = next_port() as u32;
    assert!(registry.add_server("server", APP_ID, localhost(), Some(port)));
    assert!(registry.add_client("client", APP_ID, localhost(), Some(port + 1)));
    assert!(registry.start_server("server").unwrap());
    assert!(registry.start_client("client").unwrap());

    let server_addr = registry.server("server").unwrap().local_addr().unwrap();
    registry
        .client_mut("client")
        .unwrap()
        .connect(server_addr)
        .unwrap();

    let connected = pump_until(registry, 1000, |r| {
        r.client("client").unwrap().connection_state() == ConnectionState::Connected
    });
    assert!(connected, "client never connected");
    server_addr
}

#[test]
fn test_handshake_through_registry() {
    let mut registry = SessionRegistry::new();
    let server_addr = connected_pair(&mut registry);

    let server = registry.server("server").unwrap();
    assert_eq!(server.connected_count(), 1);
    let server_id = server.id();

    let client = registry.client("client").unwrap();
    let client_id = client.id();
    let profile = client.server().unwrap();
    assert_eq!(profile.id(), server_id);
    assert_eq!(profile.endpoint(), server_addr);
    assert_eq!(profile.protocol_version(), PROTOCOL_VERSION);
    assert_eq!(profile.connected_peers(), 1);
    assert!(!profile.is_private);

    assert!(registry.server("server").unwrap().client(client_id).is_some());

    let events: Vec<PeerEvent> = registry
        .server_mut("server")
        .unwrap()
        .drain_events()
        .collect();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PeerEvent::Connected { peer_id, .. } if *peer_id == client_id))
    );
}

#[test]
fn test_wrong_application_identifier_denied() {
    let mut registry = SessionRegistry::new();
    let port = next_port() as u32;
    assert!(registry.add_server("server", APP_ID, localhost(), Some(port)));
    assert!(registry.add_client("client", "another-game", localhost(), Some(port + 1)));
    registry.start_server("server").unwrap();
    registry.start_client("client").unwrap();

    let server_addr = registry.server("server").unwrap().local_addr().unwrap();
    registry
        .client_mut("client")
        .unwrap()
        .connect(server_addr)
        .unwrap();

    let mut denial = None;
    pump_until(&mut registry, 1000, |r| {
        r.client("client").unwrap().connection_state() == ConnectionState::Disconnected
    });
    for event in registry.client_mut("client").unwrap().drain_events() {
        if let PeerEvent::ConnectionDenied { reason, .. } = event {
            denial = Some(reason);
        }
    }

    let reason = denial.expect("client was not denied");
    assert!(reason.contains("application identifier"));
    assert_eq!(registry.server("server").unwrap().connected_count(), 0);
}

#[test]
fn test_server_full_denied() {
    let settings = SessionSettings {
        max_connections: 1,
        ..Default::default()
    };
    let mut registry: SessionRegistry =
        SessionRegistry::with_settings(ConfigValidator::default(), settings);
    let server_addr = connected_pair(&mut registry);

    let port = next_port() as u32;
    assert!(registry.add_client("late", APP_ID, localhost(), Some(port)));
    registry.start_client("late").unwrap();
    registry
        .client_mut("late")
        .unwrap()
        .connect(server_addr)
        .unwrap();

    let denied = pump_until(&mut registry, 1000, |r| {
        r.client("late").unwrap().connection_state() == ConnectionState::Disconnected
    });
    assert!(denied);

    let reasons: Vec<String> = registry
        .client_mut("late")
        .unwrap()
        .drain_events()
        .filter_map(|e| match e {
            PeerEvent::ConnectionDenied { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec!["Server full".to_string()]);
}

#[test]
fn test_data_flows_both_ways() {
    let mut registry = SessionRegistry::new();
    connected_pair(&mut registry);

    let client_id = registry.client("client").unwrap().id();
    let payload = {
        let mut buffer = registry.pool().get_cleared();
        buffer.extend_from_slice(b"hello server");
        buffer
    };
    registry
        .client_mut("client")
        .unwrap()
        .send_data(payload)
        .unwrap();

    let received = pump_for_data(&mut registry, |r| {
        r.server_mut("server").unwrap().drain_events().collect()
    });
    assert_eq!(received, vec![(client_id, b"hello server".to_vec())]);

    let server_id = registry.server("server").unwrap().id();
    registry
        .server_mut("server")
        .unwrap()
        .broadcast(b"hello clients")
        .unwrap();

    let replies = pump_for_data(&mut registry, |r| {
        r.client_mut("client").unwrap().drain_events().collect()
    });
    assert_eq!(replies, vec![(server_id, b"hello clients".to_vec())]);
}

fn pump_for_data<F>(registry: &mut SessionRegistry, mut drain: F) -> Vec<(Uuid, Vec<u8>)>
where
    F: FnMut(&mut SessionRegistry) -> Vec<PeerEvent>,
{
    let start = Instant::now();
    let mut received = Vec::new();
    while received.is_empty() && start.elapsed() < Duration::from_millis(1000) {
        registry.update(TICK).unwrap();
        received.extend(drain(registry).into_iter().filter_map(|e| match e {
            PeerEvent::Data { peer_id, payload } => Some((peer_id, payload)),
            _ => None,
        }));
        thread::sleep(Duration::from_millis(1));
    }
    received
}

#[test]
fn test_shutdown_notifies_clients_and_allows_removal() {
    let mut registry = SessionRegistry::new();
    connected_pair(&mut registry);

    assert!(!registry.remove_server("server"));
    assert!(registry.shutdown_server("server", "maintenance").unwrap());
    assert_eq!(
        registry.server("server").unwrap().status(),
        PeerStatus::ShutdownRequested
    );
    assert!(!registry.shutdown_server("server", "again").unwrap());

    let notified = pump_until(&mut registry, 1000, |r| {
        r.client("client").unwrap().connection_state() == ConnectionState::Disconnected
    });
    assert!(notified);

    let reasons: Vec<DisconnectReason> = registry
        .client_mut("client")
        .unwrap()
        .drain_events()
        .filter_map(|e| match e {
            PeerEvent::Disconnected { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![DisconnectReason::Remote("maintenance".to_string())]
    );

    assert_eq!(
        registry.server("server").unwrap().status(),
        PeerStatus::NotRunning
    );
    assert!(registry.server("server").unwrap().local_addr().is_none());
    assert!(registry.remove_server("server"));

    assert!(registry.shutdown_client("client", "done").unwrap());
    registry.update(TICK).unwrap();
    assert!(registry.remove_client("client"));
}

#[test]
fn test_unresponsive_client_evicted_after_refresh_ceiling() {
    let settings = SessionSettings {
        timeout_secs: 1.0,
        ..Default::default()
    };
    let mut registry: SessionRegistry =
        SessionRegistry::with_settings(ConfigValidator::default(), settings);
    let port = next_port();
    assert!(registry.add_server("server", APP_ID, localhost(), Some(port as u32)));
    registry.start_server("server").unwrap();
    let server_addr = registry.server("server").unwrap().local_addr().unwrap();

    let silent = UdpSocket::bind(("127.0.0.1", port + 1)).unwrap();
    silent
        .send_to(&connection_request(APP_ID, "silent"), server_addr)
        .unwrap();

    let joined = pump_until(&mut registry, 1000, |r| {
        r.server("server").unwrap().connected_count() == 1
    });
    assert!(joined);

    // Each 300ms step crosses one 250ms heartbeat; the fourth is unanswered.
    let step = Duration::from_millis(300);
    for _ in 0..3 {
        registry.update(step).unwrap();
        assert_eq!(registry.server("server").unwrap().connected_count(), 1);
    }
    registry.update(step).unwrap();
    assert_eq!(registry.server("server").unwrap().connected_count(), 0);

    let stale = registry
        .server_mut("server")
        .unwrap()
        .drain_events()
        .any(|e| {
            matches!(
                e,
                PeerEvent::Disconnected {
                    reason: DisconnectReason::Stale,
                    ..
                }
            )
        });
    assert!(stale);
}

#[test]
fn test_failed_acceptance_registers_nobody() {
    let port = next_port();
    let config = ConfigValidator::default()
        .validate(APP_ID, localhost(), port as u32, 4, 1408, 256, 5.0)
        .into_config()
        .unwrap();
    // The acceptance carries the server name, so it outgrows the send buffer.
    let pool = PacketPool::for_buffers(1408, 4);
    let mut server = ServerPeer::with_name("s".repeat(400), config, pool);
    server.start().unwrap();
    let server_addr = server.local_addr().unwrap();

    let welcome = UdpSocket::bind(("127.0.0.1", port + 1)).unwrap();
    let stranger = UdpSocket::bind(("127.0.0.1", port + 2)).unwrap();
    welcome
        .send_to(&connection_request(APP_ID, "welcome"), server_addr)
        .unwrap();
    stranger
        .send_to(&connection_request("another-game", "stranger"), server_addr)
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let err = server.update(TICK).unwrap_err();
    assert!(matches!(err, PeerError::PacketTooLarge { limit: 256, .. }));
    assert_eq!(server.connected_count(), 0);

    // The second request in the same batch is still answered.
    let (reply, _) = recv_packet(&stranger);
    assert!(matches!(reply.payload, PacketType::ConnectionDenied { .. }));

    let events: Vec<PeerEvent> = server.drain_events().collect();
    assert!(!events.iter().any(|e| matches!(e, PeerEvent::Connected { .. })));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PeerEvent::ConnectionDenied { .. }))
    );
}

#[test]
fn test_connection_attempt_times_out() {
    let settings = SessionSettings {
        timeout_secs: 0.5,
        ..Default::default()
    };
    let mut registry: SessionRegistry =
        SessionRegistry::with_settings(ConfigValidator::default(), settings);
    let port = next_port();
    let silent = UdpSocket::bind(("127.0.0.1", port)).unwrap();
    let target = silent.local_addr().unwrap();

    assert!(registry.add_client("client", APP_ID, localhost(), Some(port as u32 + 1)));
    registry.start_client("client").unwrap();
    registry
        .client_mut("client")
        .unwrap()
        .connect(target)
        .unwrap();

    let gave_up = pump_until(&mut registry, 2000, |r| {
        r.client("client").unwrap().connection_state() == ConnectionState::Disconnected
    });
    assert!(gave_up);

    let timed_out = registry
        .client_mut("client")
        .unwrap()
        .drain_events()
        .any(|e| matches!(e, PeerEvent::ConnectionTimedOut { addr } if addr == target));
    assert!(timed_out);

    // The request is resent on every heartbeat while waiting.
    silent.set_nonblocking(true).unwrap();
    let mut buffer = vec![0u8; 1408];
    let mut requests = 0;
    while silent.recv_from(&mut buffer).is_ok() {
        requests += 1;
    }
    assert!(requests >= 2, "only {} connection requests sent", requests);
}

#[test]
fn test_client_drops_server_that_stops_answering() {
    let settings = SessionSettings {
        timeout_secs: 1.0,
        ..Default::default()
    };
    let mut registry: SessionRegistry =
        SessionRegistry::with_settings(ConfigValidator::default(), settings);
    let port = next_port();
    let mute = UdpSocket::bind(("127.0.0.1", port)).unwrap();
    let server_addr = mute.local_addr().unwrap();

    assert!(registry.add_client("client", APP_ID, localhost(), Some(port as u32 + 1)));
    registry.start_client("client").unwrap();
    registry
        .client_mut("client")
        .unwrap()
        .connect(server_addr)
        .unwrap();

    let (request, client_addr) = recv_packet(&mute);
    assert!(matches!(
        request.payload,
        PacketType::ConnectionRequest { .. }
    ));

    let server_id = Uuid::new_v4();
    let accepted = encode(PacketType::ConnectionAccepted {
        server: ServerInfo {
            id: *server_id.as_bytes(),
            name: "mute".to_string(),
            is_private: false,
            connected_peers: 1,
            max_peers: 4,
        },
    });
    mute.send_to(&accepted, client_addr).unwrap();

    let connected = pump_until(&mut registry, 1000, |r| {
        r.client("client").unwrap().connection_state() == ConnectionState::Connected
    });
    assert!(connected);
    assert_eq!(
        registry.client("client").unwrap().server().unwrap().id(),
        server_id
    );

    // Pings go out on each 250ms heartbeat and are never answered.
    let step = Duration::from_millis(300);
    for _ in 0..3 {
        registry.update(step).unwrap();
        assert_eq!(
            registry.client("client").unwrap().connection_state(),
            ConnectionState::Connected
        );
    }
    registry.update(step).unwrap();
    assert_eq!(
        registry.client("client").unwrap().connection_state(),
        ConnectionState::Disconnected
    );

    let stale = registry
        .client_mut("client")
        .unwrap()
        .drain_events()
        .any(|e| {
            matches!(
                e,
                PeerEvent::Disconnected {
                    peer_id,
                    reason: DisconnectReason::Stale,
                } if peer_id == server_id
            )
        });
    assert!(stale);
}
