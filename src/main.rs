//! framewire: a length-prefixed TCP message server
//!
//! Serves the example routers:
//! - id 0: ping (`PONG` on the hand-off path)
//! - id 1: hello (greeting on the buffered path)
//!
//! Configuration via CLI arguments or TOML file.

use framewire::config::Config;
use framewire::protocols::hello::HelloRouter;
use framewire::protocols::ping::PingRouter;
use framewire::protocols::{HELLO_MSG_ID, PING_MSG_ID};
use framewire::{Connection, Server};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; the guard flushes and closes the log file on drop
    let _log_guard = init_logging(&config);

    info!(
        name = %config.name,
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        max_packet_size = config.max_packet_size,
        workers = config.worker_pool_size,
        "Starting framewire server"
    );

    let mut server = Server::new(config.clone());

    // A duplicate id here is a programming error; refuse to start.
    server.add_router(PING_MSG_ID, PingRouter)?;
    server.add_router(HELLO_MSG_ID, HelloRouter::new(&config.name))?;

    server.set_on_conn_start(on_conn_start);
    server.set_on_conn_stop(on_conn_stop);

    server.serve().await?;
    info!("Server stopped");
    Ok(())
}

fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match config.log_file_location() {
        Some((dir, file_name)) => {
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            builder.with_ansi(false).with_writer(writer).init();
            Some(guard)
        }
        None => {
            builder.init();
            None
        }
    }
}

/// Tag each connection with properties the stop hook reports.
fn on_conn_start(conn: &Connection) {
    conn.set_property("Name", format!("conn-{}", conn.id()));
    conn.set_property("Peer", conn.peer_addr().to_string());
    info!(conn_id = conn.id(), "Connection properties set");
}

fn on_conn_stop(conn: &Connection) {
    let name = conn.get_property_as::<String>("Name");
    let peer = conn.get_property_as::<String>("Peer");
    if let (Ok(name), Ok(peer)) = (name, peer) {
        info!(conn_id = conn.id(), name = %name, peer = %peer, "Connection closing");
    }
}
