//! Serde helpers for `bytes::Bytes` fields.
//!
//! Block payloads and binary column values are carried as `Bytes` so that a
//! redelivered block shares the producer's buffer instead of copying it.
//! Postcard encodes them as a length-prefixed byte string.

use bytes::Bytes;
use serde::{Deserializer, Serializer};

/// Serde module for `Bytes` fields
pub mod bytes_serde {
    use super::*;

    pub fn serialize<S>(val: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::serialize(&val[..], serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        Ok(Bytes::from(v))
    }
}
