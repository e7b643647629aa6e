//! TCP server: listener, accept loop and lifecycle hooks.
//!
//! Accepts sockets, enforces the connection limit, assigns connection ids
//! and launches each connection's engine on its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::DataPack;
use crate::runtime::{Connection, ConnectionRegistry, Dispatcher, Router, RouterTable};

/// Listen backlog for the server socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Callback run at a fixed point of a connection's lifecycle.
pub type ConnHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Connection lifecycle hooks.
#[derive(Default, Clone)]
pub struct Hooks {
    /// Runs once, right after the reader and writer tasks are launched.
    pub on_conn_start: Option<ConnHook>,
    /// Runs once, as the first step of `Connection::stop`.
    pub on_conn_stop: Option<ConnHook>,
}

/// State shared by the accept loop and every connection.
pub(crate) struct ServerContext {
    pub(crate) config: Arc<Config>,
    pub(crate) datapack: DataPack,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: ConnectionRegistry,
    hooks: Hooks,
}

impl ServerContext {
    pub(crate) fn new(config: Config, routes: RouterTable, hooks: Hooks) -> Self {
        Self {
            datapack: DataPack::new(config.max_packet_size),
            dispatcher: Dispatcher::new(routes, &config),
            registry: ConnectionRegistry::new(config.max_connections),
            config: Arc::new(config),
            hooks,
        }
    }

    pub(crate) fn call_on_conn_start(&self, conn: &Connection) {
        if let Some(hook) = &self.hooks.on_conn_start {
            debug!(conn_id = conn.id(), "Calling connection start hook");
            hook(conn);
        }
    }

    pub(crate) fn call_on_conn_stop(&self, conn: &Connection) {
        if let Some(hook) = &self.hooks.on_conn_stop {
            debug!(conn_id = conn.id(), "Calling connection stop hook");
            hook(conn);
        }
    }
}

/// Server builder: routes and hooks are registered here before `start`.
pub struct Server {
    config: Config,
    routes: RouterTable,
    hooks: Hooks,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server {
            config,
            routes: RouterTable::new(),
            hooks: Hooks::default(),
        }
    }

    /// Configuration the server will start with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a router for `msg_id`.
    ///
    /// A second registration for the same id fails with `DuplicateRoute`
    /// and leaves the first in place.
    pub fn add_router<R: Router>(&mut self, msg_id: u32, router: R) -> Result<()> {
        self.routes.add_router(msg_id, Arc::new(router))
    }

    /// Hook run once per connection after its tasks launch.
    pub fn set_on_conn_start<F>(&mut self, hook: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.hooks.on_conn_start = Some(Arc::new(hook));
    }

    /// Hook run once per connection as it stops; properties are still readable.
    pub fn set_on_conn_stop<F>(&mut self, hook: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.hooks.on_conn_stop = Some(Arc::new(hook));
    }

    /// Start the worker pool, bind the listener and spawn the accept loop.
    pub async fn start(self) -> Result<ServerHandle> {
        let addr = resolve(&self.config.listen_addr()).await?;
        let ctx = Arc::new(ServerContext::new(self.config, self.routes, self.hooks));

        ctx.dispatcher.start_worker_pool();

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;

        info!(
            name = %ctx.config.name,
            address = %local_addr,
            max_connections = ctx.config.max_connections,
            max_packet_size = ctx.config.max_packet_size,
            workers = ctx.config.worker_pool_size,
            routes = ctx.dispatcher.routes().len(),
            "Server listening"
        );

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&ctx), shutdown.clone()));

        Ok(ServerHandle {
            ctx,
            local_addr,
            shutdown,
            accept_task,
        })
    }

    /// Start, serve until Ctrl-C, then stop.
    pub async fn serve(self) -> Result<()> {
        let handle = self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        handle.stop().await;
        Ok(())
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry of live connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.ctx.registry
    }

    /// Resolved configuration of the running server.
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Stop accepting, tear down every connection and close the worker queues.
    pub async fn stop(self) {
        info!(name = %self.ctx.config.name, "Stopping server");

        self.shutdown.cancel();
        if let Err(e) = self.accept_task.await {
            error!(error = %e, "Accept loop failed");
        }

        self.ctx.registry.clear_all();
        self.ctx.dispatcher.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, shutdown: CancellationToken) {
    let mut conn_ids = ConnIds::default();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        if ctx.registry.is_full() {
            warn!(
                peer = %peer,
                max_connections = ctx.config.max_connections,
                "Connection limit reached, rejecting"
            );
            drop(stream);
            continue;
        }

        let Some(conn_id) = conn_ids.allocate() else {
            warn!(peer = %peer, "Connection ids exhausted, rejecting");
            drop(stream);
            continue;
        };

        let conn = match Connection::new(conn_id, stream, Arc::clone(&ctx)) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to set up connection");
                continue;
            }
        };

        debug!(conn_id, peer = %peer, "New connection");
        ctx.registry.add(Arc::clone(&conn));
        tokio::spawn(conn.start());
    }

    info!("Accept loop stopped");
}

/// Monotonic connection id source. Ids are never reused, so once `u32::MAX`
/// has been handed out every later accept is rejected.
#[derive(Debug, Default)]
struct ConnIds {
    next: u32,
    exhausted: bool,
}

impl ConnIds {
    fn allocate(&mut self) -> Option<u32> {
        if self.exhausted {
            return None;
        }
        let id = self.next;
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            None => self.exhausted = true,
        }
        Some(id)
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no address found for {addr}"),
            ))
        })
}

fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
