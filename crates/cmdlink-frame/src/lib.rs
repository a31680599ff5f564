//! Length-prefixed value framing for local IPC.
//!
//! Every message on the wire is:
//! - A 4-byte little-endian payload length `N`
//! - `N` bytes of payload
//!
//! `N == 0` is a valid probe frame that carries no value. Readers loop over
//! partial reads internally, so callers always see whole frames, a clean
//! end-of-stream, or an error.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod channel;
pub mod codec;
pub mod error;
pub mod primitives;
pub mod reader;
pub mod serializer;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::FrameCodec;
pub use channel::StreamChannel;
pub use codec::{
    decode_frame, decode_value, encode_frame, encode_value, Frame, FrameConfig, Received,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, PROBE_FRAME,
};
pub use error::{FrameError, Result};
pub use primitives::PrimitiveArray;
pub use reader::FrameReader;
pub use serializer::{JsonSerializer, Serializer};
pub use writer::FrameWriter;
