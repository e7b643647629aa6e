//! Hello router implementation.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::protocols::HELLO_MSG_ID;
use crate::runtime::{Request, Router};

/// Replies `Hello from <server>` on the buffered path.
#[derive(Debug)]
pub struct HelloRouter {
    greeting: String,
}

impl HelloRouter {
    /// Router greeting on behalf of `server_name`.
    pub fn new(server_name: &str) -> Self {
        Self {
            greeting: format!("Hello from {server_name}"),
        }
    }

    /// The reply payload.
    pub fn greeting(&self) -> &str {
        &self.greeting
    }
}

#[async_trait]
impl Router for HelloRouter {
    async fn pre_handle(&self, req: &Request) {
        debug!(conn_id = req.conn_id(), "Hello received");
    }

    async fn handle(&self, req: &Request) {
        if let Err(e) = req
            .connection()
            .send_buff_msg(HELLO_MSG_ID, self.greeting.clone())
            .await
        {
            warn!(conn_id = req.conn_id(), error = %e, "Hello reply failed");
        }
    }
}
