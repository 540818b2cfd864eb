//! # buildwire
//!
//! Loopback IPC channel between a build tool and an observer process
//! (typically an IDE). The observer attaches to a running build and
//! exchanges structured events and configuration over a local TCP socket
//! without the build ever blocking on the observer's behavior: the channel
//! is best-effort, and every failure mode resolves to "proceed as if the
//! observer were absent".
//!
//! ## Architecture
//!
//! - **Message envelope** ([`message`]): immutable session id / thread id /
//!   kind / property bag value with a symmetric binary codec
//! - **Wire primitives** ([`protocol`]): length-prefixed strings and frames
//! - **Client** ([`connection::BuildConnection`]): one lazily-opened socket
//!   per build worker, blocking request/reply
//! - **Server** ([`connection::serve`]): accept loop with one worker thread
//!   per connection
//! - **Session negotiation** ([`session`]): per-session configuration taken
//!   from the reply to the session start message
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use buildwire::{serve, BuildConnection, Message, SessionHandle, WorkerId};
//!
//! // Observer side: reply to every message, opting into project lists.
//! let server = serve(|message| {
//!     println!("observed: {message}");
//!     None
//! })?;
//!
//! // Build side: dial back using the published port.
//! let connection = BuildConnection::new(server.port());
//! let session = SessionHandle::new();
//! let worker = WorkerId::next();
//! let start = Message::session_start(Path::new("/work/build"), worker);
//! let reply = connection.send(&start, &session, worker).into_reply();
//! # drop(reply);
//! # Ok::<(), buildwire::BuildwireError>(())
//! ```

pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod session;
pub mod severity;

pub use connection::{serve, BuildConnection, SendOutcome, ServerHandle, WorkerId, PORT_ENV_VAR};
pub use error::{BuildwireError, Result};
pub use message::{Message, MessageKind, ProjectInfo, Properties};
pub use session::{Configuration, SessionHandle};
pub use severity::Severity;
