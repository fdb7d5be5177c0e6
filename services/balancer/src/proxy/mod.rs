//! L4 TCP relay.
//!
//! This module provides:
//! - TCP listener and accept loop
//! - Round-robin backend selection
//! - Bidirectional byte relay
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> BackendSelector -> Endpoint::connect -> relay <-> Backend
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{BackendPool, BackendSelector, Listener, ListenerConfig};
//!
//! let pool = BackendPool::new(vec!["127.0.0.1:9001".parse()?])?;
//! let selector = Arc::new(BackendSelector::new(pool));
//!
//! let config = ListenerConfig::new("0.0.0.0:8080".parse()?);
//! let listener = Arc::new(Listener::bind(config, selector).await?);
//! listener.run().await?;
//! ```

mod backend;
mod listener;
mod relay;

pub use backend::{BackendPool, BackendSelector, Endpoint};
pub use listener::{Listener, ListenerConfig, ListenerStats, DEFAULT_LISTEN_PORT};
pub use relay::{relay, RelayReport, Side, Termination, RELAY_BUFFER_SIZE};
