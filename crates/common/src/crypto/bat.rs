use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::linked_data::BlockId;

/// Size of a block access token in bytes
pub const BAT_SIZE: usize = 32;

/// An opaque block access token.
///
/// Possession of the token authorizes cross-node reads of the blocks it
/// was minted for; the token never leaves the stores involved, so an
/// outside observer cannot enumerate a file's chunk locations from it.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bat(#[serde_as(as = "serde_with::Bytes")] [u8; BAT_SIZE]);

impl Bat {
    /// Mint a fresh random token.
    pub fn generate() -> Self {
        let mut buff = [0; BAT_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Bat(buff)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// The content identifier naming this token.
    pub fn id(&self) -> BatId {
        BatId(BlockId::raw(&self.0))
    }

    /// Bind the token to its identifier for passing through store calls.
    pub fn with_id(self) -> BatWithId {
        let id = self.id();
        BatWithId { bat: self, id }
    }

    /// Identity-form identifier embedding the token itself, for
    /// inlining in the blocks it protects. Identity links are never
    /// fetched, so a DAG walk skips over them.
    pub fn inline_id(&self) -> BlockId {
        BlockId::identity(&self.0).expect("bat fits identity form")
    }
}

impl From<[u8; BAT_SIZE]> for Bat {
    fn from(bytes: [u8; BAT_SIZE]) -> Self {
        Bat(bytes)
    }
}

/// Identifier of an access token: the content id of its bytes, safe to
/// reference in plaintext metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatId(pub BlockId);

/// An access token together with its identifier, as threaded through
/// put/get/mirror calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatWithId {
    pub bat: Bat,
    pub id: BatId,
}
