//! Base64 byte-blob wrapper for the JSON wire format.
//!
//! The wire format is self-describing JSON; raw byte content (primitive bit
//! patterns, pointer-reached memory regions) is carried as base64 text
//! rather than a JSON array of numbers, matching the "length-prefixed JSON
//! with base64 byte-blobs" format named in the external interfaces.

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A `Vec<u8>` that (de)serializes through base64 instead of a numeric JSON
/// array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBlob(pub Vec<u8>);

impl ByteBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ByteBlob {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl Serialize for ByteBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for ByteBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}
