//! Frame packing and unpacking.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::Message;
use crate::error::{Error, Result};

/// Frame header size: payload length (u32 LE) followed by message id (u32 LE).
pub const HEADER_LEN: usize = 8;

/// Stateless frame codec.
///
/// Only carries the maximum accepted payload size (0 = unlimited).
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPack {
    max_packet_size: u32,
}

impl DataPack {
    /// Codec rejecting payloads above `max_packet_size` (0 = unlimited).
    pub fn new(max_packet_size: u32) -> Self {
        Self { max_packet_size }
    }

    /// Header size in bytes.
    pub fn head_len(&self) -> usize {
        HEADER_LEN
    }

    /// Configured payload limit.
    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    /// Encode a complete message into header + payload bytes.
    pub fn pack(&self, msg: &Message) -> Result<Bytes> {
        if !msg.is_complete() {
            return Err(Error::LengthMismatch {
                declared: msg.len(),
                actual: msg.payload().len(),
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.payload().len());
        buf.put_u32_le(msg.len());
        buf.put_u32_le(msg.id());
        buf.extend_from_slice(msg.payload());
        Ok(buf.freeze())
    }

    /// Decode the 8-byte header. The returned message has an empty payload;
    /// the caller reads `len` more bytes and attaches them.
    pub fn unpack(&self, header: &[u8]) -> Result<Message> {
        if header.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader(header.len()));
        }

        let mut cursor = &header[..HEADER_LEN];
        let len = cursor.get_u32_le();
        let id = cursor.get_u32_le();

        if self.max_packet_size > 0 && len > self.max_packet_size {
            return Err(Error::Oversize {
                len,
                max: self.max_packet_size,
            });
        }

        Ok(Message::header(id, len))
    }

    /// Read exactly one frame from `reader`.
    ///
    /// A short read surfaces as an `UnexpectedEof` I/O error.
    pub async fn read_message<R>(&self, reader: &mut R) -> Result<Message>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let mut msg = self.unpack(&header)?;
        if msg.len() > 0 {
            let mut payload = vec![0u8; msg.len() as usize];
            reader.read_exact(&mut payload).await?;
            msg.set_payload(payload);
        }

        Ok(msg)
    }
}
