// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Encodings
//!
//! Two interchangeable wire encodings for typed payloads: JSON (human readable) and
//! bincode (compact binary). The publisher tags every message with the codec's
//! content type; the subscriber always decodes with the codec it was created with,
//! so a payload published with the other encoding fails to decode and is discarded.

use crate::errors::AmqpError;
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for bincode messages
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Upper bound for a single decoded binary payload, guards against bogus length prefixes.
/// Only enforced when decoding: encoding fails solely for unrepresentable values.
pub const MAX_BINARY_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Converts typed values to message bodies and back.
pub trait Codec: Send + Sync + 'static {
    /// Content type tag published alongside the payload.
    fn content_type(&self) -> &'static str;

    /// Serializes a value. Fails before any network interaction.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError>;

    /// Deserializes a payload into the requested type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError>;
}

/// [`Codec`] backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::EncodeError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(data).map_err(|err| AmqpError::DecodeError(err.to_string()))
    }
}

/// [`Codec`] backed by `bincode`.
///
/// The format is not self-describing: both ends must agree on the exact type.
/// Trailing bytes are rejected, and a payload over [`MAX_BINARY_PAYLOAD`] is refused
/// on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
    }
}

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        Self::options()
            .serialize(value)
            .map_err(|err| AmqpError::EncodeError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        Self::options()
            .with_limit(MAX_BINARY_PAYLOAD)
            .deserialize(data)
            .map_err(|err| AmqpError::DecodeError(err.to_string()))
    }
}
