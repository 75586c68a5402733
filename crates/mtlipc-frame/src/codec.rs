use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Command, ResponseKind};
use crate::error::{FrameError, Result};

/// Length of the ASCII message id field.
pub const MESSAGE_ID_LEN: usize = 36;

/// Frame header: message id (36) + command (4) + kind (4) + length (4) = 48 bytes.
pub const HEADER_SIZE: usize = MESSAGE_ID_LEN + 12;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A 36-byte ASCII UUID identifying a request/response pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Reserved id carried by unsolicited events from the remote.
    pub const SENTINEL: MessageId = MessageId(*b"00000000-0000-0000-0000-000000000000");

    /// Generate a fresh random (v4) id. Never equal to [`MessageId::SENTINEL`].
    pub fn random() -> Self {
        let mut buf = [0u8; MESSAGE_ID_LEN];
        uuid::Uuid::new_v4().hyphenated().encode_lower(&mut buf);
        Self(buf)
    }

    /// Build an id from exactly 36 ASCII bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; MESSAGE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::InvalidMessageId { len: bytes.len() })?;
        if !raw.is_ascii() {
            return Err(FrameError::InvalidMessageId { len: bytes.len() });
        }
        Ok(Self(raw))
    }

    /// Raw id bytes as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }

    /// Returns true for the reserved event id.
    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

impl FromStr for MessageId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }
}

/// Decoded fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: MessageId,
    pub command: Command,
    /// Response kind, or the command code echoed by a request.
    pub kind: i32,
    /// Declared payload length. May be negative on a corrupt stream.
    pub payload_length: i32,
}

impl FrameHeader {
    /// Decode the header at the start of `src`, if enough bytes are present.
    pub fn peek(src: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(decode_header(header))
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: MessageId,
    pub command: Command,
    pub kind: i32,
    pub payload: Bytes,
}

impl Frame {
    /// A request frame: its kind echoes the command.
    pub fn request(message_id: MessageId, command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            command,
            kind: command.code(),
            payload: payload.into(),
        }
    }

    /// A response frame with an explicit kind.
    pub fn response(
        message_id: MessageId,
        command: Command,
        kind: ResponseKind,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_id,
            command,
            kind: kind.code(),
            payload: payload.into(),
        }
    }

    /// An unsolicited event frame on the sentinel id.
    pub fn event(command: Command, kind: ResponseKind, payload: impl Into<Bytes>) -> Self {
        Self::response(MessageId::SENTINEL, command, kind, payload)
    }

    /// Returns true if this frame carries the sentinel id.
    pub fn is_event(&self) -> bool {
        self.message_id.is_sentinel()
    }

    /// The kind field interpreted as a response kind.
    pub fn response_kind(&self) -> ResponseKind {
        ResponseKind::from(self.kind)
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append this frame's wire encoding to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_response(&self.message_id, self.command, self.kind, &self.payload, dst)
    }
}

/// Encode a request frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬───────────┬───────────┬───────────┬────────────────┐
/// │ Message id (36B) │ Command   │ Kind      │ Length    │ Payload        │
/// │ ASCII UUID       │ (4B LE)   │ (4B LE)   │ (4B LE)   │ (Length bytes) │
/// └──────────────────┴───────────┴───────────┴───────────┴────────────────┘
/// ```
///
/// Requests carry their command code in the kind slot.
pub fn encode_frame(
    message_id: &MessageId,
    command: Command,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    encode_response(message_id, command, command.code(), payload, dst)
}

/// Encode a frame with an explicit kind into the wire format.
pub fn encode_response(
    message_id: &MessageId,
    command: Command,
    kind: impl Into<i32>,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let length = i32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(message_id.as_bytes());
    dst.put_i32_le(command.code());
    dst.put_i32_le(kind.into());
    dst.put_i32_le(length);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a 48-byte header. Total: never fails and never looks at the payload.
pub fn decode_header(src: &[u8; HEADER_SIZE]) -> FrameHeader {
    let mut id = [0u8; MESSAGE_ID_LEN];
    id.copy_from_slice(&src[..MESSAGE_ID_LEN]);

    let mut fields = &src[MESSAGE_ID_LEN..];
    let command = Command::from(fields.get_i32_le());
    let kind = fields.get_i32_le();
    let payload_length = fields.get_i32_le();

    FrameHeader {
        message_id: MessageId(id),
        command,
        kind,
        payload_length,
    }
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes exactly the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = FrameHeader::peek(src) else {
        return Ok(None); // Need more data
    };

    let payload_len = usize::try_from(header.payload_length)
        .map_err(|_| FrameError::InvalidLength(header.payload_length))?;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        message_id: header.message_id,
        command: header.command,
        kind: header.kind,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
