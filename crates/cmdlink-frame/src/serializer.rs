use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result};

/// Turns values into frame payloads and back.
///
/// Implementations must be deterministic and type-preserving for the
/// values that actually cross the channel (primitives, arrays, small DTOs).
/// Failures in either direction surface as [`FrameError::Serialization`].
pub trait Serializer: Clone + Send + Sync + 'static {
    /// Encode `value` into payload bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode payload bytes into a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|err| FrameError::Serialization(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|err| FrameError::Serialization(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
