use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use ntwk::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub role: Role,
    pub app_id: String,
    pub bind: IpAddr,
    pub port: Option<u32>,
    pub connect: Option<SocketAddr>,
    pub tick_rate: u32,
    pub max_connections: usize,
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    pub timeout_secs: f32,
    pub pool_size: usize,
    pub private: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            role: Role::Server,
            app_id: String::from("ntwk"),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: None,
            connect: None,
            tick_rate: 60,
            max_connections: session.max_connections,
            receive_buffer_size: session.receive_buffer_size,
            send_buffer_size: session.send_buffer_size,
            timeout_secs: session.timeout_secs,
            pool_size: session.pool_size,
            private: false,
        }
    }
}

impl HostSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file at '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse TOML from '{}'", path.display()))
    }

    pub fn session(&self) -> SessionSettings {
        SessionSettings {
            max_connections: self.max_connections,
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            timeout_secs: self.timeout_secs,
            pool_size: self.pool_size,
        }
    }
}
