//! Request: one decoded message bound to the connection it arrived on.

use bytes::Bytes;
use std::sync::Arc;

use crate::protocol::Message;
use crate::runtime::Connection;

/// A decoded frame together with its originating connection.
///
/// Created once per frame by the connection reader and owned by whichever
/// worker processes it.
#[derive(Debug, Clone)]
pub struct Request {
    conn: Arc<Connection>,
    msg: Message,
}

impl Request {
    /// Bind `msg` to the connection it arrived on.
    pub fn new(conn: Arc<Connection>, msg: Message) -> Self {
        Self { conn, msg }
    }

    /// Originating connection, used to send replies.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// The decoded message.
    pub fn message(&self) -> &Message {
        &self.msg
    }

    /// Message id used for routing.
    pub fn msg_id(&self) -> u32 {
        self.msg.id()
    }

    /// Message payload.
    pub fn data(&self) -> &Bytes {
        self.msg.payload()
    }

    /// Id of the originating connection; selects the worker shard.
    pub fn conn_id(&self) -> u32 {
        self.conn.id()
    }
}
