//! Client side of the channel: one blocking socket per worker.
//!
//! Each worker of the build tool owns an independent connection to the
//! observer, identified by an explicit [`WorkerId`] passed through the call
//! context. Connections are opened lazily on first use and never shared
//! between workers; within one connection the exchange is strictly
//! call-and-response.
//!
//! Sending is best-effort. Any transport failure marks the worker's
//! connection permanently closed and surfaces as a non-reply outcome, never
//! as an error to the caller.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::protocol::{read_frame, write_frame};

/// Identifier of one build-tool worker, used to key its connection and
/// stamped on messages as the originating thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(i64);

static NEXT_WORKER_ID: AtomicI64 = AtomicI64::new(0);

impl WorkerId {
    /// Create a worker id from an explicit value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Generate the next process-unique worker id.
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of this id.
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

/// Raw result of one request/reply exchange, before the reply is decoded.
#[derive(Debug)]
pub(crate) enum RawReply {
    /// The peer replied with this frame payload.
    Payload(Bytes),
    /// The connection is closed, either previously or by a zero-length
    /// reply frame received during this exchange.
    Closed,
    /// An I/O failure occurred; the connection is closed now.
    Transport,
}

/// One worker's connection to the observer.
#[derive(Debug, Default)]
pub struct ClientConnection {
    stream: Option<TcpStream>,
    closed: bool,
}

impl ClientConnection {
    /// Create a connection that will dial on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this connection was permanently closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one frame and block for the reply frame.
    pub(crate) fn send(&mut self, port: u16, payload: &[u8]) -> RawReply {
        if self.closed {
            return RawReply::Closed;
        }
        match self.exchange(port, payload) {
            Ok(Some(reply)) => RawReply::Payload(reply),
            Ok(None) => {
                // Zero-length reply is the peer's termination signal.
                self.shutdown();
                RawReply::Closed
            }
            Err(e) => {
                tracing::debug!("channel transport failure, closing connection: {e}");
                self.shutdown();
                RawReply::Transport
            }
        }
    }

    fn exchange(&mut self, port: u16, payload: &[u8]) -> io::Result<Option<Bytes>> {
        let stream = match self.stream.take() {
            Some(stream) => self.stream.insert(stream),
            None => self
                .stream
                .insert(TcpStream::connect(("127.0.0.1", port))?),
        };
        write_frame(stream, payload)?;
        read_frame(stream)
    }

    fn shutdown(&mut self) {
        self.closed = true;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Registry of per-worker connections.
///
/// The map itself is the only shared state; a connection is checked out for
/// the duration of an exchange so the lock is never held across blocking
/// I/O. A worker id must not be used from two threads at once: each
/// worker's connection is owned exclusively by its caller.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: Mutex<HashMap<WorkerId, ClientConnection>>,
}

impl ConnectionPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one frame over `worker`'s connection and block for the reply.
    pub(crate) fn send(&self, worker: WorkerId, port: u16, payload: &[u8]) -> RawReply {
        let mut connection = self.lock().remove(&worker).unwrap_or_default();
        let reply = connection.send(port, payload);
        self.lock().insert(worker, connection);
        reply
    }

    /// Whether `worker`'s connection was permanently closed.
    pub fn is_closed(&self, worker: WorkerId) -> bool {
        self.lock()
            .get(&worker)
            .map(ClientConnection::is_closed)
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, ClientConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_unique() {
        let a = WorkerId::next();
        let b = WorkerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_closed_connection_skips_io() {
        let mut connection = ClientConnection::new();
        connection.shutdown();

        // Port 1 is unreachable; a closed connection must not even try.
        assert!(matches!(connection.send(1, b"x"), RawReply::Closed));
        assert!(connection.is_closed());
    }

    #[test]
    fn test_connect_refused_closes_connection() {
        let mut connection = ClientConnection::new();

        // Nothing listens on the reserved port 1.
        assert!(matches!(connection.send(1, b"x"), RawReply::Transport));
        assert!(connection.is_closed());
        assert!(matches!(connection.send(1, b"x"), RawReply::Closed));
    }

    #[test]
    fn test_pool_tracks_connections_per_worker() {
        let pool = ConnectionPool::new();
        let worker = WorkerId::new(5);
        let other = WorkerId::new(6);

        assert!(!pool.is_closed(worker));
        assert!(matches!(pool.send(worker, 1, b"x"), RawReply::Transport));
        assert!(pool.is_closed(worker));
        assert!(!pool.is_closed(other));
    }
}
