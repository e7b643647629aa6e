//! Wire protocol: length-prefixed frames.
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+----------------+------------------+
//! | payload length | message id     | payload          |
//! | u32 LE         | u32 LE         | `length` bytes   |
//! +----------------+----------------+------------------+
//! ```
//!
//! No magic bytes, checksum or version field. A frame whose declared length
//! exceeds the configured maximum ends the connection, since the stream
//! cannot be resynchronized.

pub mod codec;
pub mod message;

pub use codec::{DataPack, HEADER_LEN};
pub use message::Message;
