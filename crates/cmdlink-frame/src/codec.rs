use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result};
use crate::serializer::Serializer;

/// Frame header: payload length (4 bytes, little-endian).
pub const HEADER_SIZE: usize = 4;

/// The complete wire form of a probe frame (`N == 0`, no payload).
pub const PROBE_FRAME: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One length-prefixed unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame payload. Empty for a probe frame.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// A probe frame: zero-length payload, carries no value.
    pub fn probe() -> Self {
        Self {
            payload: Bytes::new(),
        }
    }

    /// Whether this is a probe frame.
    pub fn is_probe(&self) -> bool {
        self.payload.is_empty()
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Result of decoding one frame as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Received<T> {
    /// A frame that carried a serialized value.
    Value(T),
    /// A zero-length probe frame.
    Probe,
}

impl<T> Received<T> {
    /// The carried value, or `None` for a probe.
    pub fn into_value(self) -> Option<T> {
        match self {
            Received::Value(value) => Some(value),
            Received::Probe => None,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, Received::Probe)
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┐
/// │ Length (4B)  │ Payload          │
/// │ u32 LE       │ (Length bytes)   │
/// └──────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let payload_len = declared_len(src);
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

    Ok(Some(Frame { payload }))
}

/// Build the error for a stream that ended with `buffered` holding a partial frame.
pub(crate) fn truncated(buffered: &BytesMut) -> FrameError {
    let expected = if buffered.len() < HEADER_SIZE {
        HEADER_SIZE
    } else {
        HEADER_SIZE + declared_len(buffered)
    };
    FrameError::Truncated {
        expected,
        received: buffered.len(),
    }
}

fn declared_len(src: &[u8]) -> usize {
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    u32::from_le_bytes(header) as usize
}

/// Serialize `value` and frame it, producing the complete wire bytes.
pub fn encode_value<S, T>(serializer: &S, value: &T) -> Result<Bytes>
where
    S: Serializer,
    T: Serialize + ?Sized,
{
    let payload = serializer.encode(value)?;
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(&payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Deserialize the value carried by `frame`.
pub fn decode_value<S, T>(serializer: &S, frame: &Frame) -> Result<Received<T>>
where
    S: Serializer,
    T: DeserializeOwned,
{
    if frame.is_probe() {
        return Ok(Received::Probe);
    }
    serializer.decode(frame.payload.as_ref()).map(Received::Value)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
