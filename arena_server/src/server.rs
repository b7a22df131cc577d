// TCP server, session router and per-session event loops.
//
// Architecture: thread-per-reader with one `mpsc` channel per session.
//
// - **Listener thread** (non-blocking `accept()` loop): spawns a handshake
//   thread for each new TCP connection.
// - **Handshake threads** (one per pending connection, short-lived): read the
//   `Hello` with a short timeout, check the protocol version, and pass the
//   connection to the router as a `Joining`. A silent peer only ties up its
//   own handshake thread.
// - **Router** (the server thread): forwards each `Joining` to the session
//   named in it, creating that session (and its thread) on first use.
//   Sessions that have finished are dropped from the routing table; a later
//   `Hello` for the same name starts a fresh game.
// - **Session threads** (one per session): own a `Session` and process its
//   events one at a time. `recv_timeout` doubles as the game clock: the wait
//   is bounded by the active seat's remaining time bank (turn-based) or the
//   next tick (real-time), so no separate timer thread is needed.
// - **Reader threads** (one per client): decode `ClientMessage` frames and
//   forward them to their session. EOF, a read error or a malformed frame is
//   reported as a disconnect.
//
// Session threads are the only writers to client streams; reader threads
// only read. Sessions share no mutable state, so a session that fails takes
// down nobody but its own clients.
//
// A session closes its inbox under the `open` lock before shutting down and
// hands any joins still queued back to the router, so a client routed to a
// session that is just ending lands in a fresh one instead of being dropped.
//
// Shutdown: every loop checks `keep_running` (cleared by
// `ServerHandle::stop`) at least every `POLL_INTERVAL`.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arena_core::{GameFactory, GameManager, GameSettings};
use arena_protocol::framing;
use arena_protocol::message::{ClientMessage, ServerMessage};
use arena_protocol::types::{ClientId, ClientRole};
use arena_protocol::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Upper bound on any blocking wait, so loops notice shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a new connection has to send `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that completed the handshake and waits to be seated.
struct Joining {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
    client_name: String,
    session: String,
    role: ClientRole,
}

/// Events delivered to a session thread.
enum SessionEvent {
    NewClient(Joining),
    MessageFrom {
        client: ClientId,
        message: ClientMessage,
    },
    Disconnected {
        client: ClientId,
    },
}

/// Configuration for starting a server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    /// Name of the game every session hosts.
    pub game: String,
    /// Settings applied to every new session.
    pub settings: GameSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7878,
            bind_address: "127.0.0.1".into(),
            game: "Nim".into(),
            settings: GameSettings::default(),
        }
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for every session to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Block until the server exits on its own.
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the server on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 lets the OS pick).
pub fn start_server(
    config: ServerConfig,
    factory: Arc<dyn GameFactory>,
) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    tracing::info!("serving {} on {addr}", factory.game_name());

    let keep_running = Arc::new(AtomicBool::new(true));
    let flag = keep_running.clone();
    let thread = thread::spawn(move || run_router(listener, config, factory, flag));

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct SessionHandle {
    tx: Sender<SessionEvent>,
    /// Cleared by the session thread, under the lock, before it stops
    /// reading its inbox.
    open: Arc<Mutex<bool>>,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a new client for this session, or hand it back if the session
    /// is closing.
    fn deliver(&self, joining: Joining) -> Result<(), Joining> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err(joining);
        }
        self.tx
            .send(SessionEvent::NewClient(joining))
            .map_err(|SendError(event)| match event {
                SessionEvent::NewClient(joining) => joining,
                _ => unreachable!("only NewClient is sent here"),
            })
    }
}

/// Accept connections and route them to sessions until `keep_running` is
/// cleared, then wait for every session thread.
fn run_router(
    listener: TcpListener,
    config: ServerConfig,
    factory: Arc<dyn GameFactory>,
    keep_running: Arc<AtomicBool>,
) {
    let (join_tx, join_rx) = mpsc::channel::<Joining>();

    let keep_running_listener = keep_running.clone();
    let handshake_tx = join_tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!("connection from {peer}");
                    if stream.set_nonblocking(false).is_err() {
                        continue;
                    }
                    let tx = handshake_tx.clone();
                    thread::spawn(move || handshake(stream, tx));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    tracing::error!("accept failed: {e}");
                    break;
                }
            }
        }
    });

    let mut sessions: BTreeMap<String, SessionHandle> = BTreeMap::new();
    while keep_running.load(Ordering::SeqCst) {
        match join_rx.recv_timeout(POLL_INTERVAL) {
            Ok(joining) => {
                route(&mut sessions, joining, &config, &factory, &join_tx, &keep_running);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        sessions.retain(|name, handle| {
            let alive = !handle.thread.is_finished();
            if !alive {
                tracing::info!("[{name}] session closed");
            }
            alive
        });
    }

    keep_running.store(false, Ordering::SeqCst);
    for (_, handle) in sessions {
        let _ = handle.thread.join();
    }
}

/// Read the `Hello` of a new connection and pass it to the router.
fn handshake(stream: TcpStream, router: Sender<Joining>) {
    if stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).is_err() {
        return;
    }
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let (protocol_version, client_name, session, role) =
        match framing::recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Hello {
                protocol_version,
                client_name,
                session,
                role,
            }) => (protocol_version, client_name, session, role),
            Ok(other) => {
                tracing::debug!("expected Hello, got {other:?}");
                reject(stream, "expected Hello".into());
                return;
            }
            Err(e) => {
                tracing::debug!("handshake failed: {e}");
                return;
            }
        };
    if protocol_version != PROTOCOL_VERSION {
        reject(
            stream,
            format!("protocol version {protocol_version} not supported (server speaks {PROTOCOL_VERSION})"),
        );
        return;
    }

    // Only fails if the server is already stopping.
    let _ = router.send(Joining {
        reader,
        stream,
        client_name,
        session,
        role,
    });
}

/// Hand a joining client to its session, starting the session if needed.
fn route(
    sessions: &mut BTreeMap<String, SessionHandle>,
    joining: Joining,
    config: &ServerConfig,
    factory: &Arc<dyn GameFactory>,
    router: &Sender<Joining>,
    keep_running: &Arc<AtomicBool>,
) {
    let joining = match sessions.get(&joining.session) {
        Some(handle) => match handle.deliver(joining) {
            Ok(()) => return,
            Err(joining) => joining,
        },
        None => joining,
    };
    let session_name = joining.session.clone();
    sessions.remove(&session_name);

    let manager = match GameManager::new(factory.create(), config.settings.clone()) {
        Ok(manager) => manager,
        Err(err) => {
            tracing::error!("[{session_name}] could not create {}: {err}", factory.game_name());
            reject(joining.stream, format!("could not create session: {err}"));
            return;
        }
    };
    tracing::info!("[{session_name}] new {} session", factory.game_name());
    let (tx, rx) = mpsc::channel();
    let open = Arc::new(Mutex::new(true));
    let session = Session::new(session_name.clone(), manager);
    let inbox = Inbox {
        rx,
        tx: tx.clone(),
        open: open.clone(),
        router: router.clone(),
    };
    let flag = keep_running.clone();
    let thread = thread::spawn(move || run_session(session, inbox, flag));
    // Only fails if the server is already stopping.
    let _ = tx.send(SessionEvent::NewClient(joining));
    sessions.insert(session_name, SessionHandle { tx, open, thread });
}

fn reject(stream: TcpStream, reason: String) {
    tracing::info!("rejecting connection: {reason}");
    let mut writer = BufWriter::new(stream);
    let _ = framing::send(&mut writer, &ServerMessage::Rejected { reason });
}

// ---------------------------------------------------------------------------
// Session threads
// ---------------------------------------------------------------------------

/// A session thread's side of its channel.
struct Inbox {
    rx: Receiver<SessionEvent>,
    /// Cloned into each reader thread.
    tx: Sender<SessionEvent>,
    open: Arc<Mutex<bool>>,
    router: Sender<Joining>,
}

impl Inbox {
    /// Stop accepting new clients and return any still queued to the router.
    /// Returns how many were handed back.
    fn close(self) -> usize {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open = false;
        let mut returned = 0;
        for event in self.rx.try_iter() {
            if let SessionEvent::NewClient(joining) = event {
                if self.router.send(joining).is_ok() {
                    returned += 1;
                }
            }
        }
        returned
    }
}

/// One session's event loop. Runs until the session is finished or the
/// server stops.
fn run_session(mut session: Session, inbox: Inbox, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) && !session.is_finished() {
        let wait = session
            .next_wakeup(Instant::now())
            .map_or(POLL_INTERVAL, |d| d.min(POLL_INTERVAL));
        let event = inbox.rx.recv_timeout(wait);
        // Charge the clock before acting, so an order that arrives after the
        // deadline is judged against the timed-out state.
        session.on_timer(Instant::now());
        match event {
            Ok(event) => handle_event(&mut session, event, &inbox.tx, &keep_running),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let returned = inbox.close();
    if returned > 0 {
        tracing::debug!("[{}] handed {returned} joining client(s) back", session.name);
    }
    session.close();
}

fn handle_event(
    session: &mut Session,
    event: SessionEvent,
    tx: &Sender<SessionEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        SessionEvent::NewClient(Joining {
            reader,
            stream,
            client_name,
            role,
            ..
        }) => {
            let Ok(write_half) = stream.try_clone() else {
                return;
            };
            match session.add_client(&client_name, role, write_half) {
                Ok(client) => {
                    // Clear the handshake timeout for the long-lived reader.
                    let _ = stream.set_read_timeout(None);
                    let tx = tx.clone();
                    let flag = keep_running.clone();
                    thread::spawn(move || reader_loop(reader, client, tx, flag));
                }
                Err(reason) => reject(stream, reason),
            }
        }
        SessionEvent::MessageFrom { client, message } => {
            session.handle_message(client, message);
        }
        SessionEvent::Disconnected { client } => session.remove_client(client),
    }
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    client: ClientId,
    tx: Sender<SessionEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match framing::recv::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => break,
            Ok(message) => {
                if tx.send(SessionEvent::MessageFrom { client, message }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if !e.is_eof() {
                    tracing::debug!("{client}: {e}");
                }
                break;
            }
        }
    }
    let _ = tx.send(SessionEvent::Disconnected { client });
}
