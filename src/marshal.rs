//! Pluggable (de)serialization of values the core hands to storage or transport.
//!
//! The core never depends on a byte format. `JsonMarshal` is provided for the file backed state
//! storage and for tests.

use anyerror::AnyError;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("failed to marshal: {0}")]
    Marshal(AnyError),

    #[error("failed to unmarshal: {0}")]
    Unmarshal(AnyError),
}

/// Converts values of type `T` to and from bytes.
pub trait Marshal<T>: Send + Sync + 'static {
    fn marshal(&self, value: &T) -> Result<Vec<u8>, MarshalError>;

    fn unmarshal(&self, bytes: &[u8]) -> Result<T, MarshalError>;
}

/// A `Marshal` that uses `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshal;

impl<T> Marshal<T> for JsonMarshal
where T: Serialize + DeserializeOwned
{
    fn marshal(&self, value: &T) -> Result<Vec<u8>, MarshalError> {
        serde_json::to_vec(value).map_err(|e| MarshalError::Marshal(AnyError::new(&e)))
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        serde_json::from_slice(bytes).map_err(|e| MarshalError::Unmarshal(AnyError::new(&e)))
    }
}
