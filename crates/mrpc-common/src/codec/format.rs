use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;

/// Serialization format used for headers and bodies.
///
/// The enum keeps encode/decode generic over serde types while letting a
/// codec pick its format at runtime.
///
/// # Example
///
/// ```
/// use mrpc_common::codec::Format;
///
/// let bytes = Format::Json.encode(&(1, 2)).unwrap();
/// assert_eq!(bytes, b"[1,2]");
///
/// let value: (i32, i32) = Format::Json.decode(&bytes).unwrap();
/// assert_eq!(value, (1, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Compact binary encoding (postcard). Not self-describing: the reader
    /// must know the exact type it decodes into.
    Binary,
    /// JSON encoding (serde_json). Self-describing, so dynamic values such as
    /// `serde_json::Value` decode fine.
    Json,
}

impl Format {
    /// Encode a value to bytes
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Format::Binary => Ok(postcard::to_stdvec(value)?),
            Format::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode a value from bytes
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Format::Binary => Ok(postcard::from_bytes(data)?),
            Format::Json => Ok(serde_json::from_slice(data)?),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Binary => "binary",
            Format::Json => "json",
        }
    }
}

/// A message body that can be encoded in any [`Format`].
///
/// Implemented for every `Serialize` type, which lets type-erased values
/// (for example a reply produced by a service method) be written through
/// `&dyn Body`.
pub trait Body: Send + Sync {
    fn encode_with(&self, format: Format) -> Result<Vec<u8>>;
}

impl<T: Serialize + Send + Sync> Body for T {
    fn encode_with(&self, format: Format) -> Result<Vec<u8>> {
        format.encode(self)
    }
}
