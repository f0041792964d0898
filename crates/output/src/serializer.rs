use bytes::Bytes;
use thiserror::Error;

use crate::message::Measurement;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid measurement: {0}")]
    Invalid(String),
}

/// Turns a measurement into the wire payload. Supplied by the host.
pub trait Serializer: Send + Sync {
    fn serialize(&self, measurement: &Measurement) -> Result<Bytes, SerializeError>;
}

/// Serializes the whole measurement as one JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, measurement: &Measurement) -> Result<Bytes, SerializeError> {
        if measurement.name.is_empty() {
            return Err(SerializeError::Invalid("measurement name is empty".to_string()));
        }
        Ok(Bytes::from(serde_json::to_vec(measurement)?))
    }
}
