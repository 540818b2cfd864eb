//! Server side of the channel: accept loop and per-connection workers.
//!
//! The observer process runs the server. [`serve`] binds an ephemeral
//! loopback port and spawns one accept thread; every inbound connection gets
//! its own worker thread that repeatedly decodes a request, invokes the
//! application handler, and writes back the encoded reply.
//!
//! Replies and the closing frame may be written from different threads, so
//! each connection's output stream sits behind a mutex.

use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::error::Result;
use crate::message::{Message, Properties};
use crate::protocol::{read_frame, write_close_frame, write_frame};

use super::PORT_ENV_VAR;

/// Application callback invoked for every decoded message.
///
/// The returned map becomes the reply payload; `None` sends a plain
/// acknowledgement with an empty payload. The handler may be called by
/// different threads concurrently. If it panics while handling a message,
/// the connection that carried the message is terminated and its later
/// messages are lost.
pub type MessageHandler = dyn Fn(&Message) -> Option<Properties> + Send + Sync;

/// Start a server on an ephemeral loopback port.
///
/// Blocking operations inside the handler stall the build worker that sent
/// the message, so long work should be offloaded to another thread.
pub fn serve<H>(handler: H) -> Result<ServerHandle>
where
    H: Fn(&Message) -> Option<Properties> + Send + Sync + 'static,
{
    ServerHandle::bind(Arc::new(handler))
}

/// A running server.
///
/// Closing the handle stops the accept loop, sends every still-open
/// connection a zero-length closing frame so remote clients observe a clean
/// termination, and releases the listening socket. Dropping the handle
/// closes it as well.
pub struct ServerHandle {
    port: u16,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    workers: Arc<Mutex<Vec<Arc<WorkerConnection>>>>,
}

impl ServerHandle {
    fn bind(handler: Arc<MessageHandler>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers: Arc<Mutex<Vec<Arc<WorkerConnection>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_shutdown = shutdown.clone();
        let accept_workers = workers.clone();
        let accept_thread = std::thread::spawn(move || {
            accept_loop(listener, handler, accept_shutdown, accept_workers);
        });

        Ok(Self {
            port,
            shutdown,
            accept_thread: Some(accept_thread),
            workers,
        })
    }

    /// The bound local port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Publish the connection parameters a launched child process needs to
    /// dial back to this server.
    pub fn setup_process<F>(&self, mut consumer: F)
    where
        F: FnMut(&str, &str),
    {
        // Currently only the port, but may grow (e.g. timeout, reconnects).
        consumer(PORT_ENV_VAR, &self.port.to_string());
    }

    /// Shut the server down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the accept loop; it exits once it observes the flag.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        for worker in lock(&self.workers).drain(..) {
            worker.close();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(
    listener: TcpListener,
    handler: Arc<MessageHandler>,
    shutdown: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<Arc<WorkerConnection>>>>,
) {
    loop {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::debug!("accept failed, stopping server: {e}");
                return;
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let worker = match WorkerConnection::new(&stream) {
            Ok(worker) => Arc::new(worker),
            Err(e) => {
                tracing::error!("could not set up connection: {e}");
                continue;
            }
        };
        lock(&workers).push(worker.clone());
        let handler = handler.clone();
        std::thread::spawn(move || run_worker(stream, worker, handler));
    }
}

/// Shared state of one accepted connection: the write half and a closed
/// flag making the close-frame write idempotent.
struct WorkerConnection {
    output: Mutex<TcpStream>,
    closed: AtomicBool,
}

impl WorkerConnection {
    fn new(stream: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            output: Mutex::new(stream.try_clone()?),
            closed: AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply(&self, payload: &[u8]) -> io::Result<()> {
        let mut output = self.lock_output();
        write_frame(&mut *output, payload)
    }

    fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let mut output = self.lock_output();
            let _ = write_close_frame(&mut *output);
            let _ = output.shutdown(Shutdown::Both);
        }
    }

    fn lock_output(&self) -> MutexGuard<'_, TcpStream> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-connection loop: frame in, handler, frame out.
///
/// Any failure terminates the connection. A single undecodable frame or
/// handler panic therefore loses the remaining messages on this socket;
/// other connections are unaffected.
fn run_worker(mut input: TcpStream, worker: Arc<WorkerConnection>, handler: Arc<MessageHandler>) {
    while !worker.is_closed() {
        let frame = match read_frame(&mut input) {
            Ok(Some(frame)) => frame,
            // Zero-length frame: the peer is closing this connection.
            Ok(None) => break,
            Err(e) => {
                if !worker.is_closed() {
                    tracing::debug!("connection read failed: {e}");
                }
                break;
            }
        };
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("dropping connection after undecodable frame: {e}");
                break;
            }
        };
        tracing::debug!("received {message}");
        let payload = match catch_unwind(AssertUnwindSafe(|| handler(&message))) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::error!("message handler panicked, dropping connection");
                break;
            }
        };
        let reply = Message::reply_to(&message, payload);
        if let Err(e) = worker.reply(&reply.encode_own()) {
            tracing::debug!("reply write failed: {e}");
            break;
        }
    }
    worker.close();
}

fn lock(workers: &Mutex<Vec<Arc<WorkerConnection>>>) -> MutexGuard<'_, Vec<Arc<WorkerConnection>>> {
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}
