//! Message value type carried by a frame.

use bytes::Bytes;

/// One decoded (or to-be-encoded) frame.
///
/// `len` is the declared payload length. Once fully decoded it equals
/// `payload.len()`; a message produced by [`DataPack::unpack`] carries only
/// the header until [`Message::set_payload`] attaches the body.
///
/// [`DataPack::unpack`]: crate::protocol::DataPack::unpack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u32,
    len: u32,
    payload: Bytes,
}

impl Message {
    /// Build a complete message from an id and payload.
    ///
    /// Payloads longer than `u32::MAX` saturate the declared length; packing
    /// such a message fails with a length mismatch.
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            id,
            len: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            payload,
        }
    }

    /// Header-only message as decoded from the wire.
    pub(crate) fn header(id: u32, len: u32) -> Self {
        Self {
            id,
            len,
            payload: Bytes::new(),
        }
    }

    /// Message id used for routing.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Declared payload length.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// True for a header-only message.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes; empty until attached.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Attach the payload read after the header.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// True when the declared length matches the attached payload.
    pub fn is_complete(&self) -> bool {
        self.len as usize == self.payload.len()
    }

    /// Consume the message, keeping the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
