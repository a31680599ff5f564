//! Point-to-point value channel over one duplex byte stream.

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use cmdlink_transport::IpcStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::codec::{decode_value, Frame, FrameConfig, Received, PROBE_FRAME};
use crate::error::{FrameError, Result};
use crate::primitives::{self, PrimitiveArray};
use crate::reader::{transport_to_frame_error, FrameReader};
use crate::serializer::{JsonSerializer, Serializer};
use crate::writer::{encode_checked, write_all_flush};

const INITIAL_SCRATCH_CAPACITY: usize = 1024;

/// Sends and receives one value per call over a stream.
///
/// The stream may be a loopback socket, a pair of pipe ends, or anything
/// else that is `Read + Write`. Both directions share the same framing, so
/// either side may speak first.
pub struct StreamChannel<T, S = JsonSerializer> {
    reader: FrameReader<T>,
    scratch: BytesMut,
    serializer: S,
}

impl<T: Read + Write> StreamChannel<T, JsonSerializer> {
    /// Create a JSON channel with default frame configuration.
    pub fn new(stream: T) -> Self {
        Self::with_serializer(stream, JsonSerializer)
    }
}

impl<T: Read + Write, S: Serializer> StreamChannel<T, S> {
    /// Create a channel with an explicit serializer.
    pub fn with_serializer(stream: T, serializer: S) -> Self {
        Self::with_config(stream, serializer, FrameConfig::default())
    }

    /// Create a channel with explicit serializer and frame configuration.
    pub fn with_config(stream: T, serializer: S, config: FrameConfig) -> Self {
        Self {
            reader: FrameReader::with_config(stream, config),
            scratch: BytesMut::with_capacity(INITIAL_SCRATCH_CAPACITY),
            serializer,
        }
    }

    /// Serialize `value` and write it as one frame.
    pub fn send<V: Serialize + ?Sized>(&mut self, value: &V) -> Result<()> {
        let payload = self.serializer.encode(value)?;
        if payload.is_empty() {
            return Err(FrameError::Serialization(format!(
                "{} serializer produced an empty payload, which would read back as a probe",
                self.serializer.name()
            )));
        }
        self.send_bytes(&payload)
    }

    /// Write `payload` as one frame without going through the serializer.
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.reader.config().max_payload_size;
        encode_checked(payload, max, &mut self.scratch)?;
        trace!(size = payload.len(), "sending frame");
        write_all_flush(self.reader.get_mut(), &self.scratch)
    }

    /// Write a zero-length probe frame.
    pub fn send_probe(&mut self) -> Result<()> {
        write_all_flush(self.reader.get_mut(), &PROBE_FRAME)
    }

    /// Encode a primitive array and send it as one raw frame.
    pub fn send_array(&mut self, array: &PrimitiveArray) -> Result<()> {
        let payload = primitives::encode_array(array)?;
        self.send_bytes(&payload)
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the peer closed the stream without sending anything
    /// further; it is not an error.
    pub fn receive_frame(&mut self) -> Result<Option<Frame>> {
        self.reader.read_frame()
    }

    /// Read the next frame and deserialize it.
    pub fn receive<V: DeserializeOwned>(&mut self) -> Result<Option<Received<V>>> {
        match self.reader.read_frame()? {
            Some(frame) => decode_value(&self.serializer, &frame).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`receive`](Self::receive), but a probe frame also reads as `None`.
    pub fn receive_value<V: DeserializeOwned>(&mut self) -> Result<Option<V>> {
        Ok(self.receive()?.and_then(Received::into_value))
    }

    /// Read the next frame's raw payload. A probe yields an empty payload.
    pub fn receive_bytes(&mut self) -> Result<Option<Bytes>> {
        Ok(self.reader.read_frame()?.map(|frame| frame.payload))
    }

    /// Read one frame of packed little-endian doubles.
    pub fn receive_f64_array(&mut self) -> Result<Option<Vec<f64>>> {
        match self.receive_bytes()? {
            Some(payload) => primitives::decode_f64_array(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Read one frame holding UTF-8 text.
    pub fn receive_string(&mut self) -> Result<Option<String>> {
        match self.receive_bytes()? {
            Some(payload) => String::from_utf8(payload.to_vec())
                .map(Some)
                .map_err(|err| FrameError::Primitive(format!("string is not UTF-8: {err}"))),
            None => Ok(None),
        }
    }

    /// The serializer used for values.
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.reader.get_ref()
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        self.reader.get_mut()
    }

    /// Consume the channel and return the inner stream.
    pub fn into_inner(self) -> T {
        self.reader.into_inner()
    }
}

impl<S: Serializer> StreamChannel<IpcStream, S> {
    /// Create a channel over an `IpcStream` and apply the configured timeouts.
    pub fn with_config_ipc(stream: IpcStream, serializer: S, config: FrameConfig) -> Result<Self> {
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(stream, serializer, config))
    }

    /// Close the write half so the peer reads a clean end-of-stream.
    pub fn finish(&mut self) -> Result<()> {
        self.reader
            .get_mut()
            .shutdown_write()
            .map_err(transport_to_frame_error)
    }
}
