use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{Level, Log, Metadata, Record};

pub const MIN_PORT: u32 = 1024;
pub const MAX_PORT: u32 = 65535;

pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1408;
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 1408;
pub const DEFAULT_TIMEOUT_SECS: f32 = 25.0;

const LOG_TARGET: &str = "ntwk::config";

/// Parameters needed to bind a peer endpoint. Callers outside the crate get
/// one from [`ConfigValidator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    app_id: String,
    bind_address: IpAddr,
    port: u16,
    max_connections: usize,
    receive_buffer_size: usize,
    send_buffer_size: usize,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("maximum connections must be at least 1")]
    MaxConnections,
    #[error("receive buffer size must be non-zero")]
    ReceiveBufferSize,
    #[error("send buffer size must be non-zero")]
    SendBufferSize,
    #[error("connection timeout must be a positive number of seconds, got {0}")]
    Timeout(f32),
    #[error("port {0} does not fit a socket address")]
    Port(u32),
}

impl ConfigError {
    pub fn parameter(&self) -> &'static str {
        match self {
            ConfigError::MaxConnections => "max_connections",
            ConfigError::ReceiveBufferSize => "receive_buffer_size",
            ConfigError::SendBufferSize => "send_buffer_size",
            ConfigError::Timeout(_) => "timeout_secs",
            ConfigError::Port(_) => "port",
        }
    }
}

impl PeerConfig {
    /// Rejects values the transport cannot use. Identifier and port range
    /// checks belong to [`ConfigValidator`], so tests may bind port 0 here.
    pub(crate) fn new(
        app_id: impl Into<String>,
        bind_address: IpAddr,
        port: u32,
        max_connections: usize,
        receive_buffer_size: usize,
        send_buffer_size: usize,
        timeout_secs: f32,
    ) -> Result<Self, ConfigError> {
        let port = u16::try_from(port).map_err(|_| ConfigError::Port(port))?;
        if max_connections == 0 {
            return Err(ConfigError::MaxConnections);
        }
        if receive_buffer_size == 0 {
            return Err(ConfigError::ReceiveBufferSize);
        }
        if send_buffer_size == 0 {
            return Err(ConfigError::SendBufferSize);
        }
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(ConfigError::Timeout(timeout_secs));
        }
        let timeout = Duration::try_from_secs_f32(timeout_secs)
            .map_err(|_| ConfigError::Timeout(timeout_secs))?;

        Ok(Self {
            app_id: app_id.into(),
            bind_address,
            port,
            max_connections,
            receive_buffer_size,
            send_buffer_size,
            timeout,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn bind_address(&self) -> IpAddr {
        self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }

    pub fn send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigResult {
    Success(PeerConfig),
    DeniedApplicationIdentifierNullOrWhitespace,
    DeniedIpAddressNull,
    DeniedPortOutOfRange,
    Failure { parameter: String, message: String },
}

impl ConfigResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConfigResult::Success(_))
    }

    pub fn into_config(self) -> Option<PeerConfig> {
        match self {
            ConfigResult::Success(config) => Some(config),
            _ => None,
        }
    }
}

/// Forwards to whatever logger is installed on the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

/// Gatekeeper for [`PeerConfig`] construction. Expected validation failures
/// come back as a [`ConfigResult`] variant, and every one of them is written
/// to the injected logger first.
#[derive(Clone)]
pub struct ConfigValidator {
    logger: Arc<dyn Log>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new(Arc::new(GlobalLogger))
    }
}

impl fmt::Debug for ConfigValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValidator").finish_non_exhaustive()
    }
}

impl ConfigValidator {
    pub fn new(logger: Arc<dyn Log>) -> Self {
        Self { logger }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn validate(
        &self,
        app_id: &str,
        bind_address: Option<IpAddr>,
        port: u32,
        max_connections: usize,
        receive_buffer_size: usize,
        send_buffer_size: usize,
        timeout_secs: f32,
    ) -> ConfigResult {
        if app_id.trim().is_empty() {
            self.deny("app_id", "application identifier is empty or whitespace");
            return ConfigResult::DeniedApplicationIdentifierNullOrWhitespace;
        }

        let Some(bind_address) = bind_address else {
            self.deny("bind_address", "bind address is missing");
            return ConfigResult::DeniedIpAddressNull;
        };

        if !(MIN_PORT..=MAX_PORT).contains(&port) {
            self.deny(
                "port",
                &format!("port {port} outside {MIN_PORT}..={MAX_PORT}"),
            );
            return ConfigResult::DeniedPortOutOfRange;
        }

        match PeerConfig::new(
            app_id,
            bind_address,
            port,
            max_connections,
            receive_buffer_size,
            send_buffer_size,
            timeout_secs,
        ) {
            Ok(config) => ConfigResult::Success(config),
            Err(e) => {
                let message = e.to_string();
                self.write(Level::Error, e.parameter(), &message);
                ConfigResult::Failure {
                    parameter: e.parameter().to_string(),
                    message,
                }
            }
        }
    }

    /// Validates with the transport defaults for everything but identity and
    /// addressing.
    pub fn validate_endpoint(
        &self,
        app_id: &str,
        bind_address: Option<IpAddr>,
        port: u32,
    ) -> ConfigResult {
        self.validate(
            app_id,
            bind_address,
            port,
            DEFAULT_MAX_CONNECTIONS,
            DEFAULT_RECEIVE_BUFFER_SIZE,
            DEFAULT_SEND_BUFFER_SIZE,
            DEFAULT_TIMEOUT_SECS,
        )
    }

    fn deny(&self, parameter: &str, message: &str) {
        self.write(Level::Warn, parameter, message);
    }

    fn write(&self, level: Level, parameter: &str, message: &str) {
        self.logger.log(
            &Record::builder()
                .level(level)
                .target(LOG_TARGET)
                .args(format_args!("peer configuration rejected ({parameter}): {message}"))
                .build(),
        );
    }
}
