//! Connection engine and message dispatch.
//!
//! - `Connection`: per-socket reader/writer tasks, send paths, property bag
//! - `ConnectionRegistry`: live connections by id
//! - `Router` / `RouterTable`: message id → handler chain
//! - `Dispatcher`: sharded worker pool executing handlers off the reader path

mod connection;
mod dispatcher;
mod registry;
mod request;
mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnState, Connection, Property};
pub use dispatcher::Dispatcher;
pub use registry::ConnectionRegistry;
pub use request::Request;
pub use router::{Router, RouterTable};
