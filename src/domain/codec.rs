//! Encoding of cached values to opaque bytes.
//!
//! The store only ever sees byte strings. A [`Codec`] turns a serde value into
//! those bytes and back. Decoding failures are expected after format changes
//! and are treated by the gateway as cache misses.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Error returned by a [`Codec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value could not be encoded
    #[error("failed to encode cached value: {0}")]
    Encode(String),
    /// The stored bytes could not be decoded
    #[error("failed to decode cached value: {0}")]
    Decode(String),
}

/// Pluggable encode/decode step for cached payloads.
pub trait Codec: Send + Sync + Debug {
    /// Encode a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes produced by [`Codec::encode`].
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// A short name for logs.
    fn name(&self) -> &'static str;
}

/// Compact binary encoding via `bincode`. The default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}

/// JSON encoding, readable with any store client.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
