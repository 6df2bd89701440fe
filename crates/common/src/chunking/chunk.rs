use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::crypto::{KeyHash, Secret, SecretError};

/// Size of a chunk map key in bytes
pub const MAP_KEY_SIZE: usize = 32;

/// Address of a chunk within a writer's namespace.
///
/// Map keys are derived from the file's stream secret, never from the
/// chunk's content, so the storage layer cannot correlate the chunks of
/// one file and an outside observer cannot enumerate them.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapKey(#[serde_as(as = "serde_with::Bytes")] [u8; MAP_KEY_SIZE]);

impl MapKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; MAP_KEY_SIZE]> for MapKey {
    fn from(bytes: [u8; MAP_KEY_SIZE]) -> Self {
        MapKey(bytes)
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Full address of a chunk: which owner pays for it, which writer
/// namespace it lives in, and the map key within that namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub owner: KeyHash,
    pub writer: KeyHash,
    pub map_key: MapKey,
}

impl Location {
    pub fn new(owner: KeyHash, writer: KeyHash, map_key: MapKey) -> Self {
        Self {
            owner,
            writer,
            map_key,
        }
    }
}

/// One fixed-size (or final partial) unit of a file's plaintext.
///
/// Created once per file range during upload, encrypted immediately,
/// never mutated afterwards; overwriting the same map key replaces a
/// chunk wholesale.
#[derive(Debug, Clone)]
pub struct Chunk {
    data: Vec<u8>,
    key: Secret,
    map_key: MapKey,
}

impl Chunk {
    /// Maximum plaintext size of a single chunk
    pub const MAX_SIZE: usize = 4 * 1024 * 1024;

    pub fn new(data: Vec<u8>, key: Secret, map_key: MapKey) -> Self {
        Self { data, key, map_key }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn map_key(&self) -> &MapKey {
        &self.map_key
    }

    pub fn key(&self) -> &Secret {
        &self.key
    }

    /// Encrypt the chunk's plaintext under its data key with a fresh nonce.
    pub fn seal(&self) -> Result<Vec<u8>, SecretError> {
        self.key.encrypt(&self.data)
    }
}
