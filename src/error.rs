//! Error types for the server core.

use thiserror::Error;

/// Main error type for framing, connection and dispatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket read/write failure, including peer reset and short reads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer than eight bytes were handed to the header decoder.
    #[error("frame header truncated: got {0} bytes, need 8")]
    TruncatedHeader(usize),

    /// Declared payload length exceeds the configured maximum.
    #[error("payload of {len} bytes exceeds max packet size {max}")]
    Oversize { len: u32, max: u32 },

    /// A message's declared length does not match the payload it carries.
    #[error("message declares {declared} payload bytes but carries {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    /// A router is already registered for this message id.
    #[error("duplicate route for message id {0}")]
    DuplicateRoute(u32),

    /// No router is registered for this message id.
    #[error("no route registered for message id {0}")]
    RouteNotFound(u32),

    /// The connection has been stopped.
    #[error("connection {0} is closed")]
    ConnectionClosed(u32),

    /// No live connection with this id.
    #[error("connection {0} not found")]
    ConnectionNotFound(u32),

    /// No property stored under this key.
    #[error("property not found: {0}")]
    PropertyNotFound(String),

    /// A property exists but holds a value of another type.
    #[error("property {0} holds a value of a different type")]
    PropertyType(String),

    /// The worker queue for this shard is closed.
    #[error("worker {0} is not accepting requests")]
    WorkerUnavailable(usize),
}

impl Error {
    /// Framing errors; the stream position cannot be recovered after these.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::TruncatedHeader(_) | Error::Oversize { .. } | Error::LengthMismatch { .. }
        )
    }
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
