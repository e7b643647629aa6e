//! Registry of live connections, keyed by connection id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runtime::Connection;

/// Thread-safe map of live connections.
///
/// Shared by the accept loop (insert) and by connections removing
/// themselves on stop. Readers run concurrently; writers are exclusive.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u32, Arc<Connection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry that reports full at `max_connections` entries.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection under its id.
    pub fn add(&self, conn: Arc<Connection>) {
        let conn_id = conn.id();
        let count = {
            let mut connections = self.connections.write();
            connections.insert(conn_id, conn);
            connections.len()
        };
        debug!(conn_id, count, "Connection registered");
    }

    /// Remove a connection. Removing an absent id is a no-op.
    pub fn remove(&self, conn_id: u32) -> Option<Arc<Connection>> {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&conn_id);
            (removed, connections.len())
        };
        if removed.is_some() {
            debug!(conn_id, count, "Connection removed");
        }
        removed
    }

    /// Look up a live connection, failing with `ConnectionNotFound`.
    pub fn get(&self, conn_id: u32) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .get(&conn_id)
            .cloned()
            .ok_or(Error::ConnectionNotFound(conn_id))
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// True if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// True once the admission limit is reached.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_connections
    }

    /// Maximum number of connections admitted.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Ids of all live connections, in no particular order.
    pub fn ids(&self) -> Vec<u32> {
        self.connections.read().keys().copied().collect()
    }

    /// Stop every connection and empty the registry.
    ///
    /// The map is swapped out before any `stop` runs, so a connection's
    /// own removal never contends with this call for the lock.
    pub fn clear_all(&self) {
        let drained = std::mem::take(&mut *self.connections.write());
        let count = drained.len();
        for conn in drained.into_values() {
            conn.stop();
        }
        info!(count, remaining = self.len(), "All connections cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runtime::testing::{accept_pair, test_context};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_add_get_remove() {
        let ctx = test_context(Config::default());
        let (conn, _client) = accept_pair(&ctx, 7).await;

        assert_eq!(ctx.registry.len(), 1);
        assert!(Arc::ptr_eq(&ctx.registry.get(7).unwrap(), &conn));
        assert_eq!(ctx.registry.ids(), vec![7]);

        assert!(ctx.registry.remove(7).is_some());
        assert!(ctx.registry.remove(7).is_none());
        assert!(matches!(
            ctx.registry.get(7),
            Err(Error::ConnectionNotFound(7))
        ));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_is_full() {
        let ctx = test_context(Config {
            max_connections: 1,
            ..Config::default()
        });
        assert!(!ctx.registry.is_full());
        let (_conn, _client) = accept_pair(&ctx, 1).await;
        assert!(ctx.registry.is_full());
        assert_eq!(ctx.registry.capacity(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_stops_connections() {
        let ctx = test_context(Config::default());
        let (c1, mut client1) = accept_pair(&ctx, 1).await;
        let (c2, mut client2) = accept_pair(&ctx, 2).await;
        tokio::spawn(Arc::clone(&c1).start());
        tokio::spawn(Arc::clone(&c2).start());

        ctx.registry.clear_all();

        assert!(ctx.registry.is_empty());
        assert!(c1.is_closed());
        assert!(c2.is_closed());

        let mut buf = [0u8; 1];
        assert_eq!(client1.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(client2.read(&mut buf).await.unwrap_or(0), 0);
    }
}
