//! Ping router.
//!
//! A minimal handler for health checks and latency measurement:
//! - Client sends message id 0 with an empty payload or a short message
//! - Server responds on id 0 with `PONG` or `PONG <message>`
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  [len=0][id=0]
//! Response: [len=4][id=0]PONG
//!
//! Request:  [len=5][id=0]hello
//! Response: [len=10][id=0]PONG hello
//! ```

pub mod handler;

pub use handler::PingRouter;
