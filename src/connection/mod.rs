//! Connection module - client pool, server loop, and the best-effort facade.
//!
//! [`BuildConnection`] is the embedding point for the build tool: it reads
//! the port the observer published, frames messages onto per-worker sockets,
//! and remembers the configuration each session negotiated. The observer
//! side lives in [`serve`] / [`ServerHandle`].

mod client;
mod server;

pub use client::{ClientConnection, ConnectionPool, WorkerId};
pub use server::{serve, MessageHandler, ServerHandle};

use client::RawReply;

use crate::error::{BuildwireError, Result};
use crate::message::{Message, MessageKind};
use crate::session::{Configuration, SessionHandle, SessionRegistry};

/// Environment variable carrying the observer's port. Unset or `0` means
/// the channel is disabled.
pub const PORT_ENV_VAR: &str = "BUILDWIRE_PORT";

/// Outcome of one best-effort send.
///
/// The non-reply variants keep "disabled", "closed", "transport failure",
/// and "decode failure" distinguishable; to callers that only care whether
/// the observer answered, [`SendOutcome::into_reply`] collapses them all to
/// `None`. None of them ever fails the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The observer answered with this decoded reply.
    Reply(Message),
    /// The channel is disabled (port `0` or unset); no I/O was attempted.
    Disabled,
    /// The worker's connection is closed, either from an earlier failure or
    /// by the peer's zero-length termination frame.
    Closed,
    /// An I/O failure occurred; the worker's connection is closed now.
    Transport,
    /// The reply frame could not be decoded and the exchange was dropped.
    Decode,
}

impl SendOutcome {
    /// The reply, if the observer answered.
    pub fn into_reply(self) -> Option<Message> {
        match self {
            SendOutcome::Reply(message) => Some(message),
            _ => None,
        }
    }
}

/// Client-side channel to the observer process.
///
/// A disabled or failed channel never degrades the build itself: every
/// failure mode resolves to "proceed as if the observer were absent".
#[derive(Debug, Default)]
pub struct BuildConnection {
    port: u16,
    pool: ConnectionPool,
    sessions: SessionRegistry,
}

impl BuildConnection {
    /// Create a connection to the given local port, `0` meaning disabled.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            pool: ConnectionPool::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Create a connection from the [`PORT_ENV_VAR`] environment variable.
    pub fn from_env() -> Self {
        let port = std::env::var(PORT_ENV_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        Self::new(port)
    }

    /// Eager check whether sends can reach an observer at all. Lets callers
    /// skip building expensive messages that would be discarded anyway.
    pub fn is_enabled(&self) -> bool {
        self.port > 0
    }

    /// Send a message under `session` and block for the observer's reply.
    ///
    /// The session's correlation token is advertised as the wire session id
    /// regardless of where the message was constructed. A replied session
    /// start additionally stores the negotiated [`Configuration`] for later
    /// [`configuration`](Self::configuration) lookups.
    pub fn send(&self, message: &Message, session: &SessionHandle, worker: WorkerId) -> SendOutcome {
        if !self.is_enabled() {
            return SendOutcome::Disabled;
        }
        let payload = message.encode(Some(session.id()));
        let reply = match self.pool.send(worker, self.port, &payload) {
            RawReply::Payload(bytes) => bytes,
            RawReply::Closed => return SendOutcome::Closed,
            RawReply::Transport => return SendOutcome::Transport,
        };
        let reply = match Message::decode(&reply) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("reply decoding failed: {e}");
                return SendOutcome::Decode;
            }
        };
        if message.kind() == MessageKind::Session && message.is_session_start() {
            self.sessions.register(session, Configuration::of(&reply));
        }
        SendOutcome::Reply(reply)
    }

    /// The configuration negotiated for `session`.
    ///
    /// Only valid once a session start was sent and replied to; asking
    /// before that is a caller bug, distinct from a merely absent observer.
    pub fn configuration(&self, session: &SessionHandle) -> Result<Configuration> {
        self.sessions
            .get(session)
            .ok_or_else(|| BuildwireError::NoConfiguration(session.id().to_string()))
    }
}
