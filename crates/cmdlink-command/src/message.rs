use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;

/// Value written to the connection that wakes a stopping server.
pub const SHUTDOWN_ACK: &str = "shutdown_ack";

/// Command envelope routed by name to a registered handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl CommandMessage {
    /// Create a command carrying `data`.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Create a command with no data (`null`).
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// Create a command whose data is any serializable value.
    pub fn with_data<T: Serialize>(
        name: impl Into<String>,
        data: &T,
    ) -> Result<Self, cmdlink_frame::FrameError> {
        let data = serde_json::to_value(data)
            .map_err(|err| cmdlink_frame::FrameError::Serialization(err.to_string()))?;
        Ok(Self::new(name, data))
    }
}

/// Interpret a command's data as `T`.
pub fn data_as<T: DeserializeOwned>(data: Value) -> Result<T, HandlerError> {
    serde_json::from_value(data).map_err(|err| HandlerError::InvalidData(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let msg = CommandMessage::new("run", json!({ "sims": ["a", "b"] }));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({ "name": "run", "data": { "sims": ["a", "b"] } }));
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let msg: CommandMessage = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(msg, CommandMessage::named("ping"));
    }

    #[test]
    fn with_data_and_data_as() {
        let msg = CommandMessage::with_data("sum", &vec![1.0f64, 2.5]).unwrap();
        let values: Vec<f64> = data_as(msg.data).unwrap();
        assert_eq!(values, vec![1.0, 2.5]);
    }

    #[test]
    fn data_as_reports_shape_mismatch() {
        let err = data_as::<Vec<f64>>(json!("nope")).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidData(_)));
    }
}
