//! JSON payload codec
//!
//! Publish payloads are boxed as [`JsonPayload`] so the caller only pays for
//! a move; serialization happens on the publisher worker. Inbound payloads
//! are decoded as UTF-8 text and then deserialized into the subscriber's type.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A value the publisher worker can serialize later
///
/// Implemented for every `T: Serialize + Send`, so callers never implement it
/// by hand.
pub trait JsonPayload: Send {
    /// Serialize to a compact JSON string
    fn to_json(&self) -> Result<String, serde_json::Error>;

    /// Rust type name of the payload, for logs
    fn type_name(&self) -> &'static str;
}

impl<T> JsonPayload for T
where
    T: Serialize + Send,
{
    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Why an inbound payload could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not valid JSON for the target type
    #[error("payload does not match target type: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode raw bytes into `T`
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}
