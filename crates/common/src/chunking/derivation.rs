//! Deterministic chunk-address derivation
//!
//! Every chunk's map key and access token are a pure function of
//! `(stream secret, first chunk address, offset)`: a one-way keyed hash
//! steps from each chunk's address to the next. Knowing one chunk's
//! address (without the secret) reveals nothing about its neighbours,
//! while the uploader can re-derive any chunk's address independently
//! for resume or retry.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::crypto::Bat;

use super::chunk::{Chunk, MapKey, MAP_KEY_SIZE};

/// Size of a stream secret in bytes
pub const STREAM_SECRET_SIZE: usize = 32;

const MAP_KEY_DOMAIN: &[u8] = b"chunk-chain/map-key";
const BAT_DOMAIN: &[u8] = b"chunk-chain/bat";

#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("chunk offset {0} is not a multiple of the chunk size")]
    UnalignedOffset(u64),
    #[error("derivation error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Per-file secret seeding the chunk-chain derivation.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSecret(#[serde_as(as = "serde_with::Bytes")] [u8; STREAM_SECRET_SIZE]);

impl StreamSecret {
    pub fn generate() -> Self {
        let mut buff = [0; STREAM_SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        StreamSecret(buff)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, DerivationError> {
        if data.len() != STREAM_SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid stream secret size, expected {}, got {}",
                STREAM_SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; STREAM_SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(StreamSecret(buff))
    }

    fn key(&self) -> &[u8; STREAM_SECRET_SIZE] {
        &self.0
    }
}

/// A chunk's derived storage address: map key plus the access token
/// protecting reads of it, when the file carries tokens at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAddress {
    pub map_key: MapKey,
    pub bat: Option<Bat>,
}

impl ChunkAddress {
    pub fn new(map_key: MapKey, bat: Option<Bat>) -> Self {
        Self { map_key, bat }
    }
}

fn derive(secret: &StreamSecret, domain: &[u8], current: &ChunkAddress) -> [u8; MAP_KEY_SIZE] {
    let mut hasher = blake3::Hasher::new_keyed(secret.key());
    hasher.update(domain);
    hasher.update(current.map_key.as_bytes());
    if let Some(bat) = &current.bat {
        hasher.update(bat.bytes());
    }
    *hasher.finalize().as_bytes()
}

/// One step of the chain: the address of the chunk following `current`.
///
/// Token presence propagates: files uploaded with an access token get a
/// derived token for every chunk, files without get none.
pub fn next_chunk_address(secret: &StreamSecret, current: &ChunkAddress) -> ChunkAddress {
    let map_key = MapKey::from(derive(secret, MAP_KEY_DOMAIN, current));
    let bat = current
        .bat
        .as_ref()
        .map(|_| Bat::from(derive(secret, BAT_DOMAIN, current)));
    ChunkAddress { map_key, bat }
}

/// The address of the chunk at a byte offset, re-derived from the first
/// chunk's address.
///
/// # Errors
///
/// The offset must be a multiple of [`Chunk::MAX_SIZE`].
pub fn chunk_address_at(
    secret: &StreamSecret,
    first: &ChunkAddress,
    offset: u64,
) -> Result<ChunkAddress, DerivationError> {
    let chunk_size = Chunk::MAX_SIZE as u64;
    if offset % chunk_size != 0 {
        return Err(DerivationError::UnalignedOffset(offset));
    }
    let mut current = first.clone();
    for _ in 0..(offset / chunk_size) {
        current = next_chunk_address(secret, &current);
    }
    Ok(current)
}
