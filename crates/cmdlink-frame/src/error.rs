/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream ended part-way through a frame.
    #[error("truncated frame (expected {expected} bytes, received {received})")]
    Truncated { expected: usize, received: usize },

    /// The serializer could not encode a value or decode a payload.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream stopped accepting bytes while a frame was being written.
    #[error("connection closed (write returned zero bytes)")]
    ConnectionClosed,

    /// A raw primitive payload was malformed.
    #[error("invalid primitive encoding: {0}")]
    Primitive(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
