//! Balancer configuration.
//!
//! Every option is a command-line flag that can also be set from the
//! environment. `Cli` is the raw input; `Config` is the validated form the
//! listener is built from.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;
use crate::proxy::{BackendPool, Endpoint, ListenerConfig, DEFAULT_LISTEN_PORT};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable text.
    Text,
}

/// rr-balancer - round-robin TCP relay.
#[derive(Debug, Parser)]
#[command(name = "rr-balancer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "RR_LISTEN_ADDR", default_value = "0.0.0.0")]
    pub listen_addr: String,

    /// Port to listen on.
    #[arg(long, env = "RR_LISTEN_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Backend as host:port. Repeat for each backend, in round-robin order.
    #[arg(long = "backend", env = "RR_BACKENDS", value_delimiter = ',')]
    pub backends: Vec<String>,

    /// Backend connect timeout in milliseconds.
    #[arg(long, env = "RR_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Idle timeout for relayed connections in milliseconds.
    #[arg(long, env = "RR_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "RR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "RR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Validated balancer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds.
    pub listen: SocketAddr,
    /// Backends, in round-robin order.
    pub backends: BackendPool,
    /// Backend connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Session idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Validate parsed command-line input.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let host = cli.listen_addr.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(cli.listen_addr.clone()))?;

        let endpoints = cli
            .backends
            .iter()
            .filter(|b| !b.trim().is_empty())
            .map(|b| b.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()?;
        let backends = BackendPool::new(endpoints)?;

        Ok(Self {
            listen: SocketAddr::new(ip, cli.listen_port),
            backends,
            connect_timeout: cli.connect_timeout_ms.map(Duration::from_millis),
            idle_timeout: cli.idle_timeout_ms.map(Duration::from_millis),
            log_level: cli.log_level,
            log_format: cli.log_format,
        })
    }

    /// Connect timeout in whole milliseconds, for logging.
    pub fn connect_timeout_ms(&self) -> Option<u64> {
        self.connect_timeout.map(duration_ms)
    }

    /// Idle timeout in whole milliseconds, for logging.
    pub fn idle_timeout_ms(&self) -> Option<u64> {
        self.idle_timeout.map(duration_ms)
    }

    /// Listener settings derived from this configuration.
    pub fn listener_config(&self) -> ListenerConfig {
        let mut config = ListenerConfig::new(self.listen);
        config.connect_timeout = self.connect_timeout;
        config.idle_timeout = self.idle_timeout;
        config
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
