//! Shared helpers for runtime unit tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::runtime::{Connection, RouterTable};
use crate::server::{Hooks, ServerContext};

pub(crate) fn test_context(config: Config) -> Arc<ServerContext> {
    test_context_with_routes(config, RouterTable::new())
}

pub(crate) fn test_context_with_routes(config: Config, routes: RouterTable) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(config, routes, Hooks::default()))
}

pub(crate) fn test_context_with_hooks(config: Config, hooks: Hooks) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(config, RouterTable::new(), hooks))
}

/// Accept one loopback socket as a registered `Connection`; returns it with
/// the client end.
pub(crate) async fn accept_pair(ctx: &Arc<ServerContext>, conn_id: u32) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (stream, _) = listener.accept().await.unwrap();

    let conn = Connection::new(conn_id, stream, Arc::clone(ctx)).unwrap();
    ctx.registry.add(Arc::clone(&conn));
    (conn, client)
}

/// Poll `cond` until it holds or two seconds pass.
pub(crate) async fn wait_until(cond: impl Fn() -> bool) -> bool {
    poll_until(Duration::from_secs(2), || std::future::ready(cond())).await
}

async fn poll_until<F, Fut>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
