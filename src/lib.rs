//! framewire: a reusable TCP server core.
//!
//! Accepts client connections, frames messages with an 8-byte
//! length-prefixed header and dispatches them to pluggable routers:
//! - `protocol`: frame codec and message type
//! - `runtime`: connection engine, registry, router table, worker pool
//! - `server`: listener, accept loop, lifecycle hooks
//! - `config`: CLI and TOML configuration
//!
//! Requests from one connection are always handled by the same worker, in
//! the order they were decoded.

pub mod config;
pub mod error;
pub mod protocol;
pub mod protocols;
pub mod runtime;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{DataPack, Message};
pub use runtime::{ConnState, Connection, ConnectionRegistry, Dispatcher, Request, Router, RouterTable};
pub use server::{ConnHook, Hooks, Server, ServerHandle};
