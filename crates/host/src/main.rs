mod config;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;

use config::{HostSettings, Role};
use ntwk::{ConfigValidator, PeerEvent, SessionRegistry};

const PEER_ID: &str = "main";

#[derive(Parser)]
#[command(name = "ntwk-host")]
#[command(about = "Headless peer host")]
struct Args {
    #[arg(short, long, help = "TOML settings file; flags below override it")]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    role: Option<Role>,

    #[arg(short, long)]
    app_id: Option<String>,

    #[arg(short, long)]
    bind: Option<std::net::IpAddr>,

    #[arg(short, long)]
    port: Option<u32>,

    #[arg(long, help = "Server to connect to when running as a client")]
    connect: Option<std::net::SocketAddr>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_connections: Option<usize>,

    #[arg(long, help = "Stop after this many ticks")]
    ticks: Option<u64>,
}

impl Args {
    fn settings(&self) -> Result<HostSettings> {
        let mut settings = match &self.config {
            Some(path) => HostSettings::load(path)?,
            None => HostSettings::default(),
        };

        if let Some(role) = self.role {
            settings.role = role;
        }
        if let Some(app_id) = &self.app_id {
            settings.app_id = app_id.clone();
        }
        if let Some(bind) = self.bind {
            settings.bind = bind;
        }
        if self.port.is_some() {
            settings.port = self.port;
        }
        if self.connect.is_some() {
            settings.connect = self.connect;
        }
        if let Some(tick_rate) = self.tick_rate {
            settings.tick_rate = tick_rate;
        }
        if let Some(max_connections) = self.max_connections {
            settings.max_connections = max_connections;
        }
        Ok(settings)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = args.settings()?;
    if settings.tick_rate == 0 {
        bail!("tick rate must be at least 1");
    }

    let mut registry: SessionRegistry =
        SessionRegistry::with_settings(ConfigValidator::default(), settings.session());

    match settings.role {
        Role::Server => {
            if !registry.add_server(PEER_ID, &settings.app_id, Some(settings.bind), settings.port) {
                bail!("server configuration rejected");
            }
            if let Some(server) = registry.server_mut(PEER_ID) {
                server.set_private(settings.private);
            }
            registry.start_server(PEER_ID)?;
        }
        Role::Client => {
            let Some(remote) = settings.connect else {
                bail!("client role needs --connect");
            };
            if !registry.add_client(PEER_ID, &settings.app_id, Some(settings.bind), settings.port) {
                bail!("client configuration rejected");
            }
            registry.start_client(PEER_ID)?;
            if let Some(client) = registry.client_mut(PEER_ID) {
                client.connect(remote)?;
            }
        }
    }

    run(&mut registry, &settings, args.ticks)?;

    log::info!("Shutting down");
    match settings.role {
        Role::Server => registry.shutdown_server(PEER_ID, "Host shutting down")?,
        Role::Client => registry.shutdown_client(PEER_ID, "Host shutting down")?,
    };
    registry.update(Duration::ZERO)?;

    Ok(())
}

fn run(registry: &mut SessionRegistry, settings: &HostSettings, ticks: Option<u64>) -> Result<()> {
    let tick_duration = Duration::from_secs_f64(1.0 / settings.tick_rate as f64);
    let mut last_tick = Instant::now();
    let mut tick = 0u64;

    while ticks.is_none_or(|limit| tick < limit) {
        let now = Instant::now();
        let delta = now - last_tick;
        last_tick = now;

        registry.update(delta)?;
        log_events(registry, settings.role);
        tick += 1;

        let elapsed = last_tick.elapsed();
        if elapsed < tick_duration {
            thread::sleep(tick_duration - elapsed);
        }
    }
    Ok(())
}

fn log_events(registry: &mut SessionRegistry, role: Role) {
    let events: Vec<PeerEvent> = match role {
        Role::Server => registry
            .server_mut(PEER_ID)
            .map(|s| s.drain_events().collect())
            .unwrap_or_default(),
        Role::Client => registry
            .client_mut(PEER_ID)
            .map(|c| c.drain_events().collect())
            .unwrap_or_default(),
    };

    for event in events {
        match event {
            PeerEvent::Connected { peer_id, addr } => {
                log::info!("Peer {} connected from {}", peer_id, addr);
            }
            PeerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection with {} denied: {}", addr, reason);
            }
            PeerEvent::ConnectionTimedOut { addr } => {
                log::warn!("Connection attempt to {} timed out", addr);
            }
            PeerEvent::Disconnected { peer_id, reason } => {
                log::info!("Peer {} disconnected: {}", peer_id, reason.as_str());
            }
            PeerEvent::Data { peer_id, payload } => {
                log::debug!("{} bytes from {}", payload.len(), peer_id);
                registry.pool().recycle(payload);
            }
            PeerEvent::Stopped => log::info!("Peer stopped"),
        }
    }
}
