//! Backend pool and round-robin selection.
//!
//! The pool is fixed at startup. The selector owns the only shared mutable
//! state in the relay: a cursor into the pool, advanced under a mutex so that
//! every N consecutive picks visit each backend exactly once.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ConfigError, EndpointError};

/// A backend endpoint.
///
/// The host is kept unresolved; it is looked up on every connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// DNS name or IP literal (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Open a TCP connection to this endpoint.
    ///
    /// Name resolution happens here, once per call.
    pub async fn connect(&self, connect_timeout: Option<Duration>) -> std::io::Result<TcpStream> {
        debug!(backend = %self, "Connecting to backend");

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match connect_timeout {
            Some(limit) => match timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timeout",
                )),
            },
            None => connect.await,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                return Err(EndpointError::UnterminatedBracket(s.to_string()));
            };
            let Some(port) = tail.strip_prefix(':') else {
                return Err(EndpointError::MissingPort(s.to_string()));
            };
            (host, port)
        } else {
            let Some((host, port)) = s.rsplit_once(':') else {
                return Err(EndpointError::MissingPort(s.to_string()));
            };
            (host, port)
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost(s.to_string()));
        }

        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => {
                return Err(EndpointError::InvalidPort {
                    endpoint: s.to_string(),
                    port: port.to_string(),
                })
            }
        };

        Ok(Self::new(host, port))
    }
}

/// An ordered, non-empty, immutable set of backends.
#[derive(Debug, Clone)]
pub struct BackendPool {
    endpoints: Arc<[Endpoint]>,
}

impl BackendPool {
    /// Create a pool. Fails if `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        Ok(Self {
            endpoints: endpoints.into(),
        })
    }

    /// Number of backends. Always at least one.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false for a constructed pool.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Iterate over backends in pool order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }
}

/// Round-robin selector over a fixed backend pool.
pub struct BackendSelector {
    pool: BackendPool,
    /// Index of the next backend to hand out, always in `[0, pool.len())`.
    cursor: Mutex<usize>,
}

impl BackendSelector {
    /// Create a selector starting at the first backend.
    pub fn new(pool: BackendPool) -> Self {
        Self {
            pool,
            cursor: Mutex::new(0),
        }
    }

    /// The pool this selector draws from.
    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Pick the next backend.
    ///
    /// Reading the current entry and advancing the cursor happen under one
    /// lock, so concurrent callers never consume the same index out of turn.
    pub fn pick_next(&self) -> Endpoint {
        // The cursor is a plain index and stays valid across a panicking holder.
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let endpoint = self.pool.endpoints[*cursor].clone();
        *cursor = (*cursor + 1) % self.pool.len();
        endpoint
    }
}

impl fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSelector")
            .field("backends", &self.pool.len())
            .finish_non_exhaustive()
    }
}
