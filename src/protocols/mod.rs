//! Example routers.
//!
//! - `ping`: replies `PONG` (or `PONG <payload>`) on the hand-off path
//! - `hello`: greets the client on the buffered path

pub mod hello;
pub mod ping;

/// Message id served by [`ping::PingRouter`].
pub const PING_MSG_ID: u32 = 0;

/// Message id served by [`hello::HelloRouter`].
pub const HELLO_MSG_ID: u32 = 1;
