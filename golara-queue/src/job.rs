//! Job definition and wire envelope.

use crate::error::{QueueError, QueueResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Job payload: an opaque JSON object handed to the handler.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A named unit of work.
///
/// The serialized form is the queue envelope stored in the backing store:
///
/// ```json
/// {"name": "send_email", "payload": {"to": "user@example.com"}, "id": "..."}
/// ```
///
/// `id` is optional on the wire; envelopes without one get a fresh id when
/// decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job name, used to look up the handler factory
    pub name: String,

    /// Job payload data
    #[serde(default)]
    pub payload: Payload,

    /// Unique job identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: JobId,
}

impl Job {
    /// Create a job with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_payload(name, Payload::new())
    }

    /// Create a job with the given payload.
    pub fn with_payload(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            id: Uuid::new_v4(),
        }
    }

    /// Create a job from a JSON value, which must be an object.
    pub fn from_value(name: impl Into<String>, value: serde_json::Value) -> QueueResult<Self> {
        match value {
            serde_json::Value::Object(payload) => Ok(Self::with_payload(name, payload)),
            serde_json::Value::Null => Ok(Self::new(name)),
            other => Err(QueueError::Serialization(format!(
                "job payload must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Create a job whose payload is the serialized form of `data`.
    pub fn from_serializable<T: Serialize>(name: impl Into<String>, data: &T) -> QueueResult<Self> {
        let value =
            serde_json::to_value(data).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Self::from_value(name, value)
    }

    /// Add a payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        decode_payload(&self.payload)
    }

    /// Encode the job into its queue envelope.
    pub fn to_json(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Decode a job from its queue envelope.
    pub fn from_json(json: &str) -> QueueResult<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// Deserialize a payload map into a typed value.
pub fn decode_payload<T: DeserializeOwned>(payload: &Payload) -> QueueResult<T> {
    serde_json::from_value(serde_json::Value::Object(payload.clone()))
        .map_err(|e| QueueError::Deserialization(e.to_string()))
}
