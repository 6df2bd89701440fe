use std::fmt;
use std::str::FromStr;

use cid::Cid;
use multihash::Multihash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Multicodec for raw (opaque) blocks
pub const RAW_CODEC: u64 = 0x55;
/// Multicodec for structured (dag-cbor) blocks
pub const DAG_CBOR_CODEC: u64 = 0x71;
/// Largest value that may be embedded in an identity-form identifier
pub const MAX_IDENTITY_SIZE: usize = 64;

const SHA2_256: u64 = 0x12;
const IDENTITY: u64 = 0x00;

#[derive(Debug, thiserror::Error)]
pub enum BlockIdError {
    #[error("block id error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid block id encoding: {0}")]
    Cid(#[from] cid::Error),
}

/// Content-derived identifier of a stored block.
///
/// Identity is a function of the block's bytes and its encoding kind
/// (raw or structured): identical bytes under the same kind always
/// yield the same identifier. Rendered as a CIDv1 string, which doubles
/// as the storage key, so `decode(encode(id)) == id` must hold exactly.
///
/// Identifiers in identity form embed the value itself in the digest
/// and never require a store round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Cid);

impl BlockId {
    /// Compute the identifier of a block from its bytes and kind.
    pub fn compute(data: &[u8], raw: bool) -> Self {
        let digest = Sha256::digest(data);
        let hash = Multihash::wrap(SHA2_256, &digest).expect("sha2-256 digest fits");
        let codec = if raw { RAW_CODEC } else { DAG_CBOR_CODEC };
        BlockId(Cid::new_v1(codec, hash))
    }

    /// Identifier of a raw (opaque bytes) block.
    pub fn raw(data: &[u8]) -> Self {
        Self::compute(data, true)
    }

    /// Identifier of a structured (dag-cbor) block.
    pub fn structured(data: &[u8]) -> Self {
        Self::compute(data, false)
    }

    /// Build an identity-form identifier embedding the value itself.
    ///
    /// # Errors
    ///
    /// Fails if the value is larger than [`MAX_IDENTITY_SIZE`].
    pub fn identity(data: &[u8]) -> Result<Self, BlockIdError> {
        if data.len() > MAX_IDENTITY_SIZE {
            return Err(anyhow::anyhow!(
                "value too large for identity block id: {} > {}",
                data.len(),
                MAX_IDENTITY_SIZE
            )
            .into());
        }
        let hash = Multihash::wrap(IDENTITY, data)
            .map_err(|e| anyhow::anyhow!("identity multihash: {}", e))?;
        Ok(BlockId(Cid::new_v1(RAW_CODEC, hash)))
    }

    /// Whether this identifier embeds its value directly.
    pub fn is_identity(&self) -> bool {
        self.0.hash().code() == IDENTITY
    }

    /// The embedded value of an identity-form identifier.
    pub fn identity_payload(&self) -> Option<Vec<u8>> {
        if self.is_identity() {
            Some(self.0.hash().digest().to_vec())
        } else {
            None
        }
    }

    /// Whether the referenced block is raw (carries no links).
    pub fn is_raw(&self) -> bool {
        self.0.codec() == RAW_CODEC
    }

    /// Binary form, for embedding in pointer blobs and SQL rows.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// Parse the binary form produced by [`BlockId::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockIdError> {
        Ok(BlockId(Cid::try_from(bytes)?))
    }
}

impl From<Cid> for BlockId {
    fn from(cid: Cid) -> Self {
        BlockId(cid)
    }
}

impl From<BlockId> for Cid {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = BlockIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BlockId(Cid::try_from(s)?))
    }
}
