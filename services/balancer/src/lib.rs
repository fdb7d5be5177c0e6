pub mod config;
pub mod error;
pub mod proxy;

pub use config::{Cli, Config, LogFormat};
pub use error::{ConfigError, EndpointError};
pub use proxy::{
    relay, BackendPool, BackendSelector, Endpoint, Listener, ListenerConfig, ListenerStats,
    RelayReport, Side, Termination,
};
