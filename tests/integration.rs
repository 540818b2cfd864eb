//! Integration tests for buildwire.
//!
//! These exercise the full client/server path over real loopback sockets.

use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use buildwire::{
    serve, BuildConnection, Message, Properties, SendOutcome, SessionHandle, WorkerId,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ack_payload() -> Properties {
    let mut payload = Properties::new();
    payload.insert("ack".to_string(), Some("1".to_string()));
    payload
}

/// End-to-end scenario: session start, ack reply, server-initiated close.
#[test]
fn test_end_to_end_ack_and_close() {
    init_tracing();
    let mut server = serve(|_| Some(ack_payload())).unwrap();
    let connection = BuildConnection::new(server.port());
    let session = SessionHandle::new();
    let worker = WorkerId::next();

    let start = Message::session_start(Path::new("/work/build"), worker);
    let reply = connection
        .send(&start, &session, worker)
        .into_reply()
        .expect("observer should reply");
    assert_eq!(reply.property("ack"), Some("1"));
    assert_eq!(reply.session_id().unwrap(), session.id());
    assert_eq!(reply.thread_id(), worker.as_i64());

    server.close();

    // The next send observes the termination (close frame or reset) and
    // returns no reply; afterwards the worker's connection stays closed.
    let refresh = Message::refresh(Path::new("/work/build/target"), worker);
    assert!(connection
        .send(&refresh, &session, worker)
        .into_reply()
        .is_none());
    assert_eq!(
        connection.send(&refresh, &session, worker),
        SendOutcome::Closed
    );
}

/// A zero-length reply frame closes the client connection cleanly.
#[test]
fn test_zero_length_reply_closes_client() {
    // Hand-rolled peer that answers the first request with the close frame.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = [0u8; 4];
        std::io::Read::read_exact(&mut stream, &mut head).unwrap();
        let length = i32::from_be_bytes(head) as usize;
        let mut payload = vec![0u8; length];
        std::io::Read::read_exact(&mut stream, &mut payload).unwrap();
        stream.write_all(&0i32.to_be_bytes()).unwrap();
        stream.flush().unwrap();
        // Keep the socket open so the client sees the frame, not a reset.
        stream
    });

    let connection = BuildConnection::new(port);
    let session = SessionHandle::new();
    let worker = WorkerId::next();
    let message = Message::generic(Properties::new(), worker);

    assert_eq!(
        connection.send(&message, &session, worker),
        SendOutcome::Closed
    );
    // Once closed it stays closed; no further connection attempt is made.
    assert_eq!(
        connection.send(&message, &session, worker),
        SendOutcome::Closed
    );
    drop(peer.join().unwrap());
}

/// Session configuration negotiation through the session start reply.
#[test]
fn test_configuration_negotiation() {
    let mut opt_in = Properties::new();
    opt_in.insert("afterProjectsRead".to_string(), Some("true".to_string()));
    let server = serve(move |message| {
        if message.is_session_start() {
            Some(opt_in.clone())
        } else {
            None
        }
    })
    .unwrap();

    let connection = BuildConnection::new(server.port());
    let worker = WorkerId::next();

    let opted_in = SessionHandle::new();
    let start = Message::session_start(Path::new("/work/a"), worker);
    assert!(connection.send(&start, &opted_in, worker).into_reply().is_some());
    assert!(connection.configuration(&opted_in).unwrap().send_projects());
    // Clones of the handle address the same session.
    assert!(connection
        .configuration(&opted_in.clone())
        .unwrap()
        .send_projects());

    // A plain acknowledgement still stores a configuration, with the flag
    // defaulted to false.
    let defaulted = SessionHandle::new();
    let end_then_start = Message::session_end(Path::new("/work/b"), worker);
    assert!(connection
        .send(&end_then_start, &defaulted, worker)
        .into_reply()
        .is_some());
    assert!(connection.configuration(&defaulted).is_err());

    let start_b = Message::session_start(Path::new("/work/b"), worker);
    assert!(connection.send(&start_b, &defaulted, worker).into_reply().is_some());
    assert!(!connection.configuration(&defaulted).unwrap().send_projects());
}

/// N concurrent workers each completing M round trips with no cross-talk.
#[test]
fn test_concurrent_workers_round_trips() {
    const WORKERS: usize = 8;
    const ROUND_TRIPS: usize = 25;

    init_tracing();
    let server = serve(|message| {
        let mut payload = ack_payload();
        payload.insert("echo".to_string(), message.property("n").map(str::to_string));
        Some(payload)
    })
    .unwrap();

    let connection = Arc::new(BuildConnection::new(server.port()));
    let mut threads = Vec::new();
    for _ in 0..WORKERS {
        let connection = connection.clone();
        threads.push(thread::spawn(move || {
            let session = SessionHandle::new();
            let worker = WorkerId::next();
            for n in 0..ROUND_TRIPS {
                let mut properties = Properties::new();
                properties.insert("n".to_string(), Some(n.to_string()));
                let message = Message::generic(properties, worker);
                let reply = connection
                    .send(&message, &session, worker)
                    .into_reply()
                    .expect("every round trip should be answered");
                // A reply always matches its own request.
                assert_eq!(reply.session_id().unwrap(), session.id());
                assert_eq!(reply.thread_id(), worker.as_i64());
                assert_eq!(reply.property("echo"), Some(n.to_string().as_str()));
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }
}

/// The server hands decoded typed messages to the handler.
#[test]
fn test_server_decodes_typed_messages() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let server = serve(move |message| {
        let note = match message.refresh_path() {
            Some(path) => format!("refresh {}", path.display()),
            None => format!("projects {}", message.projects().count()),
        };
        recorder.lock().unwrap().push(note);
        None
    })
    .unwrap();

    let connection = BuildConnection::new(server.port());
    let session = SessionHandle::new();
    let worker = WorkerId::next();

    let project = buildwire::ProjectInfo {
        group_id: "org.example".to_string(),
        artifact_id: "core".to_string(),
        version: "0.1.0".to_string(),
        base_dir: "/repo/core".into(),
        model: "<project/>".to_string(),
    };
    let sends = [
        Message::refresh(Path::new("/repo/out"), worker),
        Message::projects_read([project], worker),
    ];
    for message in &sends {
        assert!(connection.send(message, &session, worker).into_reply().is_some());
    }

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec!["refresh /repo/out".to_string(), "projects 1".to_string()]);
}

/// A handler panic terminates only the affected connection.
#[test]
fn test_handler_panic_drops_only_that_connection() {
    let server = serve(|message| {
        if message.bool_property("explode") {
            panic!("bad payload");
        }
        Some(ack_payload())
    })
    .unwrap();

    let connection = BuildConnection::new(server.port());
    let session = SessionHandle::new();

    let poisoned = WorkerId::next();
    let mut explode = Properties::new();
    explode.insert("explode".to_string(), Some("true".to_string()));
    let outcome = connection.send(&Message::generic(explode, poisoned), &session, poisoned);
    assert!(outcome.into_reply().is_none());

    // A different worker gets a fresh connection and keeps working.
    let healthy = WorkerId::next();
    let reply = connection
        .send(&Message::generic(Properties::new(), healthy), &session, healthy)
        .into_reply()
        .expect("other connections are unaffected");
    assert_eq!(reply.property("ack"), Some("1"));
}
