mod cbor;

use crate::error::{ErrorClass, ErrorOrigin, InternalError};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error as ThisError;

/// Hard cap on accepted snapshot payloads.
///
/// Rehydration decodes caller-supplied bytes; anything past this size is
/// refused before the decoder runs. A real view state is orders of
/// magnitude smaller.
pub const MAX_SNAPSHOT_BYTES: usize = 16 * 1024 * 1024;

///
/// SerializeError
///

#[derive(Debug, ThisError)]
pub enum SerializeError {
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("deserialize error: {0}")]
    Deserialize(String),
}

impl From<SerializeError> for InternalError {
    fn from(err: SerializeError) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Serialize, err.to_string())
    }
}

/// Serialize a value into the snapshot wire format.
pub fn serialize<T>(ty: &T) -> Result<Vec<u8>, SerializeError>
where
    T: Serialize,
{
    cbor::encode(ty)
}

/// Deserialize a value produced by [`serialize`].
///
/// Input is bounded by [`MAX_SNAPSHOT_BYTES`].
pub fn deserialize<T>(bytes: &[u8]) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    cbor::decode(bytes, MAX_SNAPSHOT_BYTES)
}

///
/// TESTS
///
