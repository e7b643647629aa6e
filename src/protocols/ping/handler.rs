//! Ping router implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::protocols::PING_MSG_ID;
use crate::runtime::{Request, Router};

/// Replies to every ping on the hand-off path.
#[derive(Debug, Default)]
pub struct PingRouter;

impl PingRouter {
    /// Build the reply for a ping payload.
    pub fn response(payload: &[u8]) -> Bytes {
        if payload.is_empty() {
            return Bytes::from_static(b"PONG");
        }
        let mut resp = BytesMut::with_capacity(5 + payload.len());
        resp.extend_from_slice(b"PONG ");
        resp.extend_from_slice(payload);
        resp.freeze()
    }
}

#[async_trait]
impl Router for PingRouter {
    async fn handle(&self, req: &Request) {
        debug!(conn_id = req.conn_id(), len = req.data().len(), "Ping received");

        let reply = Self::response(req.data());
        if let Err(e) = req.connection().send_msg(PING_MSG_ID, reply).await {
            warn!(conn_id = req.conn_id(), error = %e, "Ping reply failed");
        }
    }
}
