//! Router capability and the message-id routing table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::runtime::Request;

/// Handler bound to one message id.
///
/// The dispatcher calls `pre_handle`, `handle` and `post_handle` in that
/// order on the worker that owns the request's connection. The pre/post
/// steps default to no-ops, so most routers only implement `handle`.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Runs before `handle`.
    async fn pre_handle(&self, _req: &Request) {}

    /// Main business logic for the message.
    async fn handle(&self, req: &Request);

    /// Runs after `handle`.
    async fn post_handle(&self, _req: &Request) {}
}

/// Message id → router mapping.
///
/// Built during setup, then frozen behind an `Arc` when the server starts.
#[derive(Default)]
pub struct RouterTable {
    apis: HashMap<u32, Arc<dyn Router>>,
}

impl RouterTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `router` for `msg_id`.
    ///
    /// Fails with `DuplicateRoute` if the id is taken; the existing router
    /// stays registered.
    pub fn add_router(&mut self, msg_id: u32, router: Arc<dyn Router>) -> Result<()> {
        if self.contains(msg_id) {
            return Err(Error::DuplicateRoute(msg_id));
        }
        self.apis.insert(msg_id, router);
        info!(msg_id, "Route registered");
        Ok(())
    }

    /// Router registered for `msg_id`, if any.
    pub fn get(&self, msg_id: u32) -> Option<&Arc<dyn Router>> {
        self.apis.get(&msg_id)
    }

    /// True if `msg_id` has a router.
    pub fn contains(&self, msg_id: u32) -> bool {
        self.apis.contains_key(&msg_id)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// True if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Run the router chain for `req`.
    ///
    /// Unknown message ids are logged and dropped; the connection stays open.
    pub async fn do_msg_handler(&self, req: &Request) {
        let Some(router) = self.apis.get(&req.msg_id()) else {
            warn!(
                conn_id = req.conn_id(),
                error = %Error::RouteNotFound(req.msg_id()),
                "Dropping request"
            );
            return;
        };

        router.pre_handle(req).await;
        router.handle(req).await;
        router.post_handle(req).await;
    }
}
