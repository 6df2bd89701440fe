use std::fmt;
use std::ops::Deref;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};

/// Size of an Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of a public-key hash in bytes
pub const KEY_HASH_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public half of a writer keypair.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct PublicKey(VerifyingKey);

impl Deref for PublicKey {
    type Target = VerifyingKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PublicKey {
    /// Convert public key to raw bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The content hash naming this key as an owner or writer.
    pub fn hash(&self) -> KeyHash {
        KeyHash::of(self)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        let key = VerifyingKey::from_bytes(&buff)
            .map_err(|_| anyhow::anyhow!("invalid edwards point for public key"))?;
        Ok(PublicKey(key))
    }
}

/// Private half of a writer keypair.
///
/// Holding the secret key is what entitles a caller to commit blocks
/// and pointer updates into the corresponding writer namespace; the
/// signature scheme itself lives with the pointer-store collaborator.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    /// Generate a new keypair from the system RNG.
    pub fn generate() -> Self {
        let mut buff = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        SecretKey(SigningKey::from_bytes(&buff))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }
}

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; PRIVATE_KEY_SIZE]) -> Self {
        SecretKey(SigningKey::from_bytes(&bytes))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.public().to_hex())
    }
}

/// A writer identity the caller can commit with: the key hash the
/// store attributes blocks to, paired with the secret key proving it.
#[derive(Debug, Clone)]
pub struct SigningWriter {
    pub key_hash: KeyHash,
    pub secret: SecretKey,
}

impl SigningWriter {
    pub fn generate() -> Self {
        let secret = SecretKey::generate();
        SigningWriter {
            key_hash: secret.public().hash(),
            secret,
        }
    }
}

/// Hash of a public key, naming an owner or writer identity.
///
/// Every put is attributed to an owner (charged for storage) and a
/// writer (the namespace the block logically belongs to); both are
/// key hashes.
#[serde_as]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct KeyHash(#[serde_as(as = "serde_with::Bytes")] [u8; KEY_HASH_SIZE]);

impl KeyHash {
    /// Hash a public key.
    pub fn of(key: &PublicKey) -> Self {
        let digest = Sha256::digest(key.to_bytes());
        let mut buff = [0; KEY_HASH_SIZE];
        buff.copy_from_slice(&digest);
        KeyHash(buff)
    }

    pub fn to_bytes(&self) -> [u8; KEY_HASH_SIZE] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; KEY_HASH_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("key hash hex decode error"))?;
        Ok(KeyHash(buff))
    }
}

impl From<[u8; KEY_HASH_SIZE]> for KeyHash {
    fn from(bytes: [u8; KEY_HASH_SIZE]) -> Self {
        KeyHash(bytes)
    }
}

impl TryFrom<&[u8]> for KeyHash {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != KEY_HASH_SIZE {
            return Err(anyhow::anyhow!(
                "invalid key hash size, expected {}, got {}",
                KEY_HASH_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; KEY_HASH_SIZE];
        buff.copy_from_slice(bytes);
        Ok(KeyHash(buff))
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_hash_deterministic() {
        let key = SecretKey::generate();
        assert_eq!(key.public().hash(), key.public().hash());
    }

    #[test]
    fn test_distinct_keys_distinct_hashes() {
        let a = SecretKey::generate();
        let b = SecretKey::generate();
        assert_ne!(a.public().hash(), b.public().hash());
    }

    #[test]
    fn test_key_hash_hex_round_trip() {
        let hash = SecretKey::generate().public().hash();
        assert_eq!(KeyHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_public_key_bytes_round_trip() {
        let public = SecretKey::generate().public();
        let recovered = PublicKey::try_from(public.to_bytes().as_slice()).unwrap();
        assert_eq!(recovered, public);
    }
}
