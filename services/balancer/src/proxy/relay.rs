//! Bidirectional byte relay between a client and its backend.
//!
//! Both directions are polled concurrently inside the session's task. The
//! first direction to finish, whether by orderly close or I/O error, ends
//! the whole session: the other direction is cancelled and both streams are
//! shut down and dropped. The optional idle timeout is session-wide; it only
//! fires when neither direction has read anything for the whole period.

use std::fmt;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::trace;

/// Read chunk size, shared by both directions.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Which side of a session an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Backend => f.write_str("backend"),
        }
    }
}

/// What ended a relay session.
#[derive(Debug)]
pub enum Termination {
    /// A zero-byte read on `Side`.
    Closed(Side),
    /// An I/O error on `Side`.
    Error(Side, io::Error),
    /// Neither side sent anything within the idle timeout.
    IdleTimeout,
}

impl Termination {
    /// Returns true if the session ended without an error.
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Closed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Closed(side) => write!(f, "{side} closed"),
            Termination::Error(side, e) => write!(f, "{side} error: {e}"),
            Termination::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Outcome of one relay session.
#[derive(Debug)]
pub struct RelayReport {
    /// Bytes written to the backend.
    pub bytes_to_backend: u64,
    /// Bytes written to the client.
    pub bytes_from_backend: u64,
    /// What ended the session.
    pub termination: Termination,
}

/// Relay bytes between `client` and `backend` until either side closes or fails.
///
/// Takes ownership of both streams; they are closed when this returns, on
/// every exit path.
pub async fn relay<C, B>(mut client: C, mut backend: B, idle_timeout: Option<Duration>) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut bytes_to_backend = 0u64;
    let mut bytes_from_backend = 0u64;
    let activity = Activity::new();

    let termination = {
        let (mut client_read, mut client_write) = tokio::io::split(&mut client);
        let (mut backend_read, mut backend_write) = tokio::io::split(&mut backend);

        let client_to_backend = copy_chunks(
            &mut client_read,
            &mut backend_write,
            Side::Client,
            Side::Backend,
            &activity,
            &mut bytes_to_backend,
        );
        let backend_to_client = copy_chunks(
            &mut backend_read,
            &mut client_write,
            Side::Backend,
            Side::Client,
            &activity,
            &mut bytes_from_backend,
        );

        tokio::select! {
            t = client_to_backend => t,
            t = backend_to_client => t,
            t = idle_watchdog(idle_timeout, &activity) => t,
        }
    };

    // Best effort: the peer may already be gone.
    let _ = backend.shutdown().await;
    let _ = client.shutdown().await;

    trace!(
        bytes_to_backend,
        bytes_from_backend,
        termination = %termination,
        "Relay finished"
    );

    RelayReport {
        bytes_to_backend,
        bytes_from_backend,
        termination,
    }
}

/// Time of the last successful read in either direction.
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve once the session has been quiet for `idle_timeout`. Never resolves
/// when no timeout is set.
async fn idle_watchdog(idle_timeout: Option<Duration>, activity: &Activity) -> Termination {
    let Some(limit) = idle_timeout else {
        return std::future::pending().await;
    };

    loop {
        let deadline = activity.last() + limit;
        if Instant::now() >= deadline {
            return Termination::IdleTimeout;
        }
        tokio::time::sleep_until(deadline).await;
    }
}

/// Copy one direction in fixed-size chunks, writing each chunk fully before
/// reading the next.
async fn copy_chunks<R, W>(
    reader: &mut R,
    writer: &mut W,
    from: Side,
    to: Side,
    activity: &Activity,
    total: &mut u64,
) -> Termination
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Termination::Closed(from),
            Ok(n) => n,
            Err(e) => return Termination::Error(from, e),
        };
        activity.touch();

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Termination::Error(to, e);
        }
        *total += n as u64;
    }
}
