//! JSON codec for persisted entities.
//!
//! Encoding keeps field names; decoding ignores unknown fields and fills
//! missing ones with defaults. Bytes that are not a JSON object of the right
//! shape fail with `Error::Decode`, which callers treat as corruption rather
//! than absence.

use serde::{de::DeserializeOwned, Serialize};

use crate::model::{PlexPin, Server, User};
use plexaccess_common::{Error, Result};

/// An entity that can be stored as a value.
pub trait Entity: Serialize + DeserializeOwned {
    /// Name used in error messages.
    const KIND: &'static str;
}

impl Entity for User {
    const KIND: &'static str = "user";
}

impl Entity for Server {
    const KIND: &'static str = "server";
}

impl Entity for PlexPin {
    const KIND: &'static str = "pin";
}

/// Encode an entity to bytes.
pub fn encode<E: Entity>(entity: &E) -> Result<Vec<u8>> {
    serde_json::to_vec(entity)
        .map_err(|e| Error::Serialization(format!("Failed to encode {}: {}", E::KIND, e)))
}

/// Decode an entity from bytes.
pub fn decode<E: Entity>(bytes: &[u8]) -> Result<E> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Decode(format!("Failed to decode {}: {}", E::KIND, e)))
}
