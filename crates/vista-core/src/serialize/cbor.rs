use crate::serialize::SerializeError;
use serde::{Serialize, de::DeserializeOwned};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Encode a snapshot value as CBOR.
pub(super) fn encode<T>(value: &T) -> Result<Vec<u8>, SerializeError>
where
    T: Serialize,
{
    serde_cbor::to_vec(value)
        .map_err(|err| SerializeError::Serialize(format!("cbor encode failed: {err}")))
}

/// Decode snapshot bytes under a size cap.
///
/// Snapshot payloads arrive from callers, so the input length is checked
/// before any decoding work, and a decoder panic is downgraded to a
/// deserialize error instead of unwinding into the view.
pub(super) fn decode<T>(bytes: &[u8], max_bytes: usize) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    if bytes.len() > max_bytes {
        return Err(SerializeError::Deserialize(format!(
            "snapshot payload of {} bytes exceeds the {max_bytes}-byte cap",
            bytes.len()
        )));
    }

    match catch_unwind(AssertUnwindSafe(|| serde_cbor::from_slice(bytes))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SerializeError::Deserialize(format!(
            "cbor decode failed: {err}"
        ))),
        Err(_) => Err(SerializeError::Deserialize(
            "cbor decoder panicked on malformed input".into(),
        )),
    }
}
