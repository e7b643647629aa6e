//! Per-socket connection engine.
//!
//! Each connection owns one reader task and one writer task:
//! - The reader decodes frames and submits them to the dispatcher.
//! - The writer drains two outbound queues onto the socket.
//!
//! ## Send paths
//!
//! - `send_msg`: hand-off queue; the caller waits until the writer picks the
//!   frame up, so a slow socket slows the producer down.
//! - `send_buff_msg`: bounded buffered queue; the caller only waits once the
//!   buffer is full.
//!
//! When both queues are ready the hand-off queue is served first. No
//! ordering holds between the two paths.
//!
//! ## Lifecycle
//!
//! `Created → Running → Closed`. `stop` swaps the state atomically, so only
//! the first of any number of concurrent callers runs the teardown.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::runtime::Request;
use crate::server::ServerContext;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and registered, tasks not yet launched.
    Created,
    /// Reader and writer tasks are running.
    Running,
    /// Stopped. Terminal.
    Closed,
}

impl ConnState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_CREATED => ConnState::Created,
            STATE_RUNNING => ConnState::Running,
            _ => ConnState::Closed,
        }
    }
}

/// Dynamically-typed connection property.
pub type Property = Arc<dyn Any + Send + Sync>;

/// Frame plus the signal that the writer has picked it up.
type HandOff = (Bytes, oneshot::Sender<()>);

/// Socket halves and queue receivers, moved into the tasks on start.
struct ConnIo {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    msg_rx: mpsc::Receiver<HandOff>,
    buff_rx: mpsc::Receiver<Bytes>,
}

/// A single client connection.
pub struct Connection {
    id: u32,
    peer_addr: SocketAddr,
    state: AtomicU8,
    ctx: Arc<ServerContext>,
    /// Present until `start` moves it into the tasks or `stop` drops it.
    io: Mutex<Option<ConnIo>>,
    msg_tx: mpsc::Sender<HandOff>,
    buff_tx: mpsc::Sender<Bytes>,
    /// Fired exactly once, by the first `stop`.
    exit: CancellationToken,
    properties: RwLock<HashMap<String, Property>>,
}

impl Connection {
    /// Wrap an accepted socket. The connection starts in `Created`.
    pub(crate) fn new(id: u32, stream: TcpStream, ctx: Arc<ServerContext>) -> io::Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let (msg_tx, msg_rx) = mpsc::channel(1);
        let (buff_tx, buff_rx) = mpsc::channel(ctx.config.buffered_send_capacity());

        Ok(Arc::new(Self {
            id,
            peer_addr,
            state: AtomicU8::new(STATE_CREATED),
            ctx,
            io: Mutex::new(Some(ConnIo {
                reader,
                writer,
                msg_rx,
                buff_rx,
            })),
            msg_tx,
            buff_tx,
            exit: CancellationToken::new(),
            properties: RwLock::new(HashMap::new()),
        }))
    }

    /// Server-assigned id, unique for the life of the server.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        ConnState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// True once `stop` has run.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnState::Closed
    }

    /// Resolves once the connection has been stopped.
    pub async fn closed(&self) {
        self.exit.cancelled().await;
    }

    /// Launch the reader and writer tasks, run the start hook, then wait
    /// until the connection is stopped.
    ///
    /// Only the first call on a `Created` connection does anything.
    pub async fn start(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!(conn_id = self.id, state = ?self.state(), "Start ignored");
            return;
        }

        // A concurrent stop may already have taken the socket.
        let Some(io) = self.io.lock().take() else {
            return;
        };

        info!(conn_id = self.id, peer = %self.peer_addr, "Connection started");

        tokio::spawn(Arc::clone(&self).reader_loop(io.reader));
        tokio::spawn(Arc::clone(&self).writer_loop(io.writer, io.msg_rx, io.buff_rx));

        self.ctx.call_on_conn_start(&self);

        self.exit.cancelled().await;
    }

    /// Tear the connection down. Idempotent.
    ///
    /// The first caller runs the stop hook (properties still readable),
    /// closes the socket, fires the exit signal, leaves the registry and
    /// releases both send queues.
    pub fn stop(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return;
        }

        debug!(conn_id = self.id, "Stopping connection");

        self.ctx.call_on_conn_stop(self);

        // Never-started connections still hold the socket and receivers here;
        // running ones release theirs when the tasks observe the exit signal.
        let io = self.io.lock().take();
        drop(io);
        self.exit.cancel();

        self.ctx.registry.remove(self.id);

        info!(
            conn_id = self.id,
            peer = %self.peer_addr,
            remaining = self.ctx.registry.len(),
            "Connection stopped"
        );
    }

    /// Send a message through the hand-off path.
    ///
    /// Returns once the writer has taken the frame.
    pub async fn send_msg(&self, msg_id: u32, data: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(self.id));
        }

        let frame = self.ctx.datapack.pack(&Message::new(msg_id, data))?;
        let (picked_tx, picked_rx) = oneshot::channel();

        self.msg_tx
            .send((frame, picked_tx))
            .await
            .map_err(|_| Error::ConnectionClosed(self.id))?;

        picked_rx
            .await
            .map_err(|_| Error::ConnectionClosed(self.id))
    }

    /// Send a message through the bounded buffered path.
    pub async fn send_buff_msg(&self, msg_id: u32, data: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(self.id));
        }

        let frame = self.ctx.datapack.pack(&Message::new(msg_id, data))?;

        self.buff_tx
            .send(frame)
            .await
            .map_err(|_| Error::ConnectionClosed(self.id))
    }

    /// Insert or replace a property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.properties.write().insert(key.into(), Arc::new(value));
    }

    /// Read a property, failing with `PropertyNotFound` if unset.
    pub fn get_property(&self, key: &str) -> Result<Property> {
        self.properties
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::PropertyNotFound(key.to_string()))
    }

    /// Typed read of a property.
    pub fn get_property_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.get_property(key)?
            .downcast::<T>()
            .map_err(|_| Error::PropertyType(key.to_string()))
    }

    /// Remove a property. Missing keys are ignored.
    pub fn remove_property(&self, key: &str) {
        self.properties.write().remove(key);
    }

    async fn reader_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        debug!(conn_id = self.id, "Reader started");
        let datapack = self.ctx.datapack;

        loop {
            let msg = tokio::select! {
                _ = self.exit.cancelled() => break,
                res = datapack.read_message(&mut reader) => match res {
                    Ok(msg) => msg,
                    Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!(conn_id = self.id, "Peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id = self.id, error = %e, "Read failed");
                        break;
                    }
                },
            };

            trace!(conn_id = self.id, msg_id = msg.id(), len = msg.len(), "Frame decoded");

            let req = Request::new(Arc::clone(&self), msg);
            tokio::select! {
                _ = self.exit.cancelled() => break,
                res = self.ctx.dispatcher.submit(req) => {
                    if let Err(e) = res {
                        warn!(conn_id = self.id, error = %e, "Dispatch failed");
                        break;
                    }
                }
            }
        }

        debug!(conn_id = self.id, "Reader exiting");
        self.stop();
    }

    async fn writer_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut msg_rx: mpsc::Receiver<HandOff>,
        mut buff_rx: mpsc::Receiver<Bytes>,
    ) {
        debug!(conn_id = self.id, "Writer started");

        loop {
            // Exit wins over frames that became ready at the same time.
            let frame = tokio::select! {
                biased;
                _ = self.exit.cancelled() => break,
                Some((frame, picked)) = msg_rx.recv() => {
                    let _ = picked.send(());
                    frame
                }
                Some(frame) = buff_rx.recv() => frame,
                else => break,
            };

            let res = tokio::select! {
                biased;
                _ = self.exit.cancelled() => break,
                res = writer.write_all(&frame) => res,
            };

            if let Err(e) = res {
                warn!(conn_id = self.id, error = %e, "Write failed");
                self.stop();
                break;
            }
        }

        debug!(conn_id = self.id, "Writer exiting");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
