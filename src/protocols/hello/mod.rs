//! Hello router: greets the client through the buffered send path.

pub mod handler;

pub use handler::HelloRouter;
