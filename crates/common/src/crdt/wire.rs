// Binary payloads: postcard over the serde derives, plus the checks the
// derives cannot express.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{0}")]
    Postcard(#[from] postcard::Error),
    #[error("{count} trailing bytes after the payload")]
    TrailingBytes { count: usize },
    #[error("operation clocks start at 1")]
    ZeroClock,
    #[error("{what} must not be empty")]
    Empty { what: &'static str },
}

/// Serialize a wire value. Plain data with known lengths cannot fail here,
/// but a failure still yields bytes every decoder rejects instead of a panic.
pub(crate) fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    postcard::to_allocvec(value).unwrap_or_else(|err| {
        error!(error = %err, "wire value failed to serialize");
        Vec::new()
    })
}

/// Deserialize exactly one value; leftover bytes are an error.
pub(crate) fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (value, rest) = postcard::take_from_bytes(bytes)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes { count: rest.len() });
    }
    Ok(value)
}
