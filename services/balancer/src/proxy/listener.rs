//! TCP listener and per-connection session handling.
//!
//! The accept loop hands every connection to its own task and goes straight
//! back to accepting. Each task picks a backend, connects, and runs the relay
//! until either side closes.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};

use super::backend::BackendSelector;
use super::relay::{relay, Termination};

/// Default listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Backend connect timeout. None waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// Session idle timeout. None disables it.
    pub idle_timeout: Option<Duration>,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            connect_timeout: None,
            idle_timeout: None,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Sessions currently running.
    pub connections_active: AtomicU64,
    /// Sessions finished, for any reason.
    pub connections_closed: AtomicU64,
    /// Failed accept calls.
    pub accept_errors: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Sessions that ended on an I/O error or idle timeout.
    pub relay_errors: AtomicU64,
    /// Bytes relayed to backends.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from backends.
    pub bytes_from_backend: AtomicU64,
}

/// Counts a session as active until dropped, including on panic or abort.
struct SessionGuard {
    stats: Arc<ListenerStats>,
}

impl SessionGuard {
    fn new(stats: Arc<ListenerStats>) -> Self {
        stats.connections_active.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A TCP listener distributing connections over a backend pool.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    selector: Arc<BackendSelector>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listen socket.
    ///
    /// A bind failure is returned as-is; callers treat it as fatal.
    pub async fn bind(config: ListenerConfig, selector: Arc<BackendSelector>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            backend_count = selector.pool().len(),
            "Listener bound"
        );

        Ok(Self {
            config,
            listener,
            selector,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the accept loop. Only returns if the local address cannot be read.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!(peer_addr = %peer_addr, "Accepted connection");

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    let guard = SessionGuard::new(Arc::clone(&self.stats));

                    let listener = Arc::clone(&self);

                    tokio::spawn(
                        async move {
                            let _guard = guard;
                            listener.handle_connection(stream, peer_addr).await;
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Handle a single session. Both sockets are closed when this returns.
    async fn handle_connection(&self, client: TcpStream, peer_addr: SocketAddr) {
        let endpoint = self.selector.pick_next();

        let backend = match endpoint.connect(self.config.connect_timeout).await {
            Ok(stream) => {
                self.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                stream
            }
            Err(e) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend = %endpoint,
                    error = %e,
                    "Backend connection failed"
                );
                // Dropping `client` closes it without sending anything.
                return;
            }
        };

        debug!(peer_addr = %peer_addr, backend = %endpoint, "Connected to backend");

        for stream in [&client, &backend] {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let report = relay(client, backend, self.config.idle_timeout).await;

        self.stats
            .bytes_to_backend
            .fetch_add(report.bytes_to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(report.bytes_from_backend, Ordering::Relaxed);

        match &report.termination {
            Termination::Closed(side) => {
                debug!(
                    backend = %endpoint,
                    closed_by = %side,
                    bytes_to_backend = report.bytes_to_backend,
                    bytes_from_backend = report.bytes_from_backend,
                    "Session closed"
                );
            }
            Termination::Error(..) | Termination::IdleTimeout => {
                self.stats.relay_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend = %endpoint,
                    reason = %report.termination,
                    bytes_to_backend = report.bytes_to_backend,
                    bytes_from_backend = report.bytes_from_backend,
                    "Session ended with error"
                );
            }
        }
    }
}
