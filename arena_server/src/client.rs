// TCP client for connecting to an arena server.
//
// Architecture:
// - `connect()` performs TCP connect + `Hello` handshake on the calling
//   thread, seeds a local mirror from the `Welcome` snapshot, then spawns a
//   background reader thread.
// - The reader thread decodes `ServerMessage` frames in a loop and pushes
//   them into an `mpsc` channel.
// - The owning thread holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox without blocking; `recv_timeout()` waits for
//   one message. Both apply every `Deltas` message to the mirror before
//   returning it, so `mirror()` always reflects what has been received.
//
// The client has no game knowledge: orders are a function name plus untyped
// arguments, and game state is read from the mirror by path.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arena_core::{Delta, DeltaGraph, StructuralInvariantError, serializer};
use arena_protocol::framing::{self, FrameError};
use arena_protocol::message::{ClientMessage, ServerMessage};
use arena_protocol::types::{ClientId, ClientRole, ObjectId, WireValue};
use arena_protocol::PROTOCOL_VERSION;
use thiserror::Error;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
    #[error("mirror diverged: {0}")]
    Mirror(#[from] StructuralInvariantError),
}

/// What the server said in `Welcome`.
#[derive(Clone, Debug)]
pub struct WelcomeInfo {
    pub client_id: ClientId,
    pub session_name: String,
    pub game_name: String,
    pub seat: Option<usize>,
}

/// TCP client for one session.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: JoinHandle<()>,
    info: WelcomeInfo,
    mirror: DeltaGraph,
}

impl NetClient {
    /// Connect, perform the `Hello` handshake and spawn a reader thread.
    pub fn connect(
        addr: impl ToSocketAddrs,
        client_name: &str,
        session: &str,
        role: ClientRole,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        framing::send(
            &mut writer,
            &ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                client_name: client_name.into(),
                session: session.into(),
                role,
            },
        )?;

        let (info, snapshot) = match framing::recv(&mut reader)? {
            ServerMessage::Welcome {
                client_id,
                session_name,
                game_name,
                seat,
                snapshot,
            } => (
                WelcomeInfo {
                    client_id,
                    session_name,
                    game_name,
                    seat,
                },
                snapshot,
            ),
            ServerMessage::Rejected { reason } => return Err(ClientError::Rejected(reason)),
            other => return Err(ClientError::Unexpected(format!("{other:?}"))),
        };
        let mirror = DeltaGraph::from_value(serializer::untyped(&snapshot))?;

        // Clear the handshake timeout for the long-lived reader loop.
        reader.get_ref().set_read_timeout(None)?;
        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || reader_loop(reader, tx));

        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: reader_thread,
            info,
            mirror,
        })
    }

    pub fn info(&self) -> &WelcomeInfo {
        &self.info
    }

    pub fn client_id(&self) -> ClientId {
        self.info.client_id
    }

    pub fn seat(&self) -> Option<usize> {
        self.info.seat
    }

    /// Local copy of the game state as of the last received delta.
    pub fn mirror(&self) -> &DeltaGraph {
        &self.mirror
    }

    pub fn send_ready(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Ready)
    }

    pub fn send_order(
        &mut self,
        object_id: &ObjectId,
        function: &str,
        args: BTreeMap<String, WireValue>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::Order {
            object_id: object_id.clone(),
            function: function.into(),
            args,
        })
    }

    pub fn send_end_turn(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::EndTurn)
    }

    /// Send `Goodbye`; the server closes the connection.
    pub fn disconnect(&mut self) {
        let _ = self.send(&ClientMessage::Goodbye);
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        framing::send(&mut self.writer, msg)?;
        Ok(())
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&mut self) -> Result<Vec<ServerMessage>, ClientError> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            self.absorb(&msg)?;
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Wait up to `timeout` for the next server message. `Ok(None)` on
    /// timeout or once the connection is gone.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ServerMessage>, ClientError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => {
                self.absorb(&msg)?;
                Ok(Some(msg))
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn absorb(&mut self, msg: &ServerMessage) -> Result<(), ClientError> {
        if let ServerMessage::Deltas { deltas } = msg {
            for wire in deltas {
                self.mirror.apply(&Delta::from_wire(wire))?;
            }
        }
        Ok(())
    }
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(msg) = framing::recv::<_, ServerMessage>(&mut reader) {
        if tx.send(msg).is_err() {
            break;
        }
    }
}
