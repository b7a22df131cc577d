// Integration smoke test for the arena server.
//
// Starts a server on localhost and talks to it with plain TCP sockets using
// the protocol crate's framing and message types: handshake, session
// routing, admission limits, departures. Game play over the wire is covered
// by `arena_tests`.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arena_games::nim::NimFactory;
use arena_protocol::framing;
use arena_protocol::message::{ClientMessage, ServerMessage};
use arena_protocol::types::{ClientId, ClientRole};
use arena_protocol::PROTOCOL_VERSION;
use arena_server::server::{ServerConfig, ServerHandle, start_server};

struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RawClient {
    fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: BufWriter::new(stream),
        }
    }

    fn send(&mut self, msg: &ClientMessage) {
        framing::send(&mut self.writer, msg).unwrap();
    }

    fn recv(&mut self) -> ServerMessage {
        framing::recv(&mut self.reader).unwrap()
    }

    /// Read until `pred` matches, skipping anything else (deltas mostly).
    fn recv_until(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        for _ in 0..50 {
            let msg = self.recv();
            if pred(&msg) {
                return msg;
            }
        }
        panic!("expected message never arrived");
    }
}

fn hello(name: &str, session: &str, role: ClientRole) -> ClientMessage {
    ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        client_name: name.into(),
        session: session.into(),
        role,
    }
}

/// Connect and complete the handshake. Returns the client and its
/// `(client_id, seat)`.
fn join(addr: SocketAddr, name: &str, session: &str, role: ClientRole) -> (RawClient, ClientId, Option<usize>) {
    let mut client = RawClient::open(addr);
    client.send(&hello(name, session, role));
    match client.recv() {
        ServerMessage::Welcome {
            client_id,
            session_name,
            game_name,
            seat,
            snapshot,
        } => {
            assert_eq!(session_name, session);
            assert_eq!(game_name, "Nim");
            assert!(snapshot["session"].is_object());
            (client, client_id, seat)
        }
        other => panic!("expected Welcome, got {other:?}"),
    }
}

fn start() -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    start_server(config, Arc::new(NimFactory)).unwrap()
}

#[test]
fn full_session_lifecycle() {
    let (handle, addr) = start();

    // 1. Two players take seats in join order.
    let (mut alice, alice_id, seat) = join(addr, "Alice", "smoke", ClientRole::Player);
    assert_eq!((alice_id, seat), (ClientId(0), Some(0)));
    let (mut bob, bob_id, seat) = join(addr, "Bob", "smoke", ClientRole::Player);
    assert_eq!((bob_id, seat), (ClientId(1), Some(1)));

    // 2. A spectator gets no seat; a third player is turned away.
    let (_watcher, _, seat) = join(addr, "Watcher", "smoke", ClientRole::Spectator);
    assert_eq!(seat, None);
    let mut carol = RawClient::open(addr);
    carol.send(&hello("Carol", "smoke", ClientRole::Player));
    match carol.recv() {
        ServerMessage::Rejected { reason } => assert_eq!(reason, "session is full"),
        other => panic!("expected Rejected, got {other:?}"),
    }

    // 3. Alice saw Bob's seat appear as deltas.
    let msg = alice.recv_until(|m| matches!(m, ServerMessage::Deltas { .. }));
    let ServerMessage::Deltas { deltas } = msg else { unreachable!() };
    assert!(deltas.iter().any(|d| d.path.first() == Some(&"session".into())));

    // 4. Alice leaves; Bob is told.
    alice.send(&ClientMessage::Goodbye);
    let msg = bob.recv_until(|m| matches!(m, ServerMessage::ClientLeft { .. }));
    assert_eq!(
        msg,
        ServerMessage::ClientLeft {
            client_id: alice_id,
            name: "Alice".into()
        }
    );

    // 5. Her seat is free again.
    let (_dave, _, seat) = join(addr, "Dave", "smoke", ClientRole::Player);
    assert_eq!(seat, Some(1));

    handle.stop();
}

#[test]
fn sessions_are_routed_by_name() {
    let (handle, addr) = start();
    let (_a, a_id, a_seat) = join(addr, "A", "one", ClientRole::Player);
    let (_b, b_id, b_seat) = join(addr, "B", "two", ClientRole::Player);
    // Each session numbers its own clients and seats.
    assert_eq!((a_id, a_seat), (ClientId(0), Some(0)));
    assert_eq!((b_id, b_seat), (ClientId(0), Some(0)));
    handle.stop();
}

#[test]
fn first_message_must_be_hello() {
    let (handle, addr) = start();
    let mut client = RawClient::open(addr);
    client.send(&ClientMessage::Ready);
    assert!(matches!(client.recv(), ServerMessage::Rejected { .. }));
    handle.stop();
}

#[test]
fn order_before_start_is_an_error_reply() {
    let (handle, addr) = start();
    let (mut a, _, _) = join(addr, "A", "early", ClientRole::Player);
    a.send(&ClientMessage::EndTurn);
    match a.recv_until(|m| matches!(m, ServerMessage::Reply(_))) {
        ServerMessage::Reply(arena_protocol::OrderReply::Error { code, .. }) => {
            assert_eq!(code, "not-running");
        }
        other => panic!("expected an error reply, got {other:?}"),
    }
    handle.stop();
}

#[test]
fn silent_connection_does_not_hold_up_other_sessions() {
    let (handle, addr) = start();
    // Connects but never says Hello.
    let _silent = TcpStream::connect(addr).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let begun = Instant::now();
    let (_other, _, seat) = join(addr, "Other", "other", ClientRole::Player);
    assert_eq!(seat, Some(0));
    assert!(
        begun.elapsed() < Duration::from_secs(1),
        "join took {:?}",
        begun.elapsed()
    );
    handle.stop();
}
