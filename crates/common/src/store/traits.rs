use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{BatWithId, KeyHash};
use crate::linked_data::{BlockId, CodecError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unauthorized read of block {0}")]
    Unauthorized(BlockId),
    #[error("store state error: {0}")]
    State(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PointerError {
    #[error("unparseable pointer for writer {0}")]
    Parse(KeyHash),
    #[error("pointer error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Stable identity of one store instance, independent of its address.
///
/// Derived from the node's public identity bytes, so two handles to the
/// same node compare equal and a store can answer "is this block local"
/// without a network round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(BlockId);

impl StoreId {
    pub fn derive(identity: &[u8]) -> Self {
        StoreId(BlockId::raw(identity))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to an open upload transaction.
///
/// Blocks written under a live transaction are protected from garbage
/// collection until the transaction closes; closing is the caller's
/// promise that every block it wants kept is now reachable from a
/// mutable pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TransactionId(Uuid::from_str(s)?))
    }
}

/// Read authorization hook consulted before serving raw block bytes.
#[async_trait]
pub trait BlockAuthorizer: Send + Sync {
    async fn allow_read(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<bool, StoreError>;
}

/// Authorizer for single-tenant stores: every read is permitted.
pub struct AllowAll;

#[async_trait]
impl BlockAuthorizer for AllowAll {
    async fn allow_read(
        &self,
        _block: &BlockId,
        _bat: Option<&BatWithId>,
    ) -> Result<bool, StoreError> {
        Ok(true)
    }
}

/// A content-addressed block store.
///
/// Writes are always attributed to an owner (who pays for the space)
/// and a writer (whose namespace the blocks live in), and always happen
/// inside a transaction.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// The identity of the node this store persists to.
    fn id(&self) -> StoreId;

    async fn start_transaction(&self, owner: KeyHash) -> Result<TransactionId, StoreError>;

    async fn close_transaction(
        &self,
        owner: KeyHash,
        tid: TransactionId,
    ) -> Result<(), StoreError>;

    /// Store a batch of blocks, returning their identifiers in order.
    ///
    /// `raw` selects the codec: raw leaf bytes or structured dag-cbor.
    async fn put(
        &self,
        owner: KeyHash,
        writer: KeyHash,
        blocks: Vec<Bytes>,
        raw: bool,
        tid: TransactionId,
    ) -> Result<Vec<BlockId>, StoreError>;

    /// Fetch a block's bytes, or `None` if the store does not have it.
    ///
    /// Identity-encoded blocks resolve without touching storage.
    async fn get(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Option<Bytes>, StoreError>;

    /// The child links of a structured block, empty for raw blocks.
    ///
    /// Links reveal shape, not content, so the local stores ignore the
    /// token; a store serving remote callers may require it.
    async fn get_links(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Vec<BlockId>, StoreError>;

    async fn get_size(&self, block: &BlockId) -> Result<Option<usize>, StoreError>;

    async fn has_block(&self, block: &BlockId) -> Result<bool, StoreError>;
}

/// A block store that also supports deletion and garbage collection.
///
/// Mirror targets and caches are deletable; the public write path never
/// deletes through this interface.
#[async_trait]
pub trait DeletableBlockStore: BlockStore {
    async fn delete(&self, block: &BlockId) -> Result<(), StoreError>;

    /// Delete every stored block not in `keep`, returning the set of
    /// deleted identifiers.
    async fn retain_only(&self, keep: &HashSet<BlockId>) -> Result<HashSet<BlockId>, StoreError>;

    /// All blocks currently protected by open transactions.
    async fn open_transaction_blocks(&self) -> Result<HashSet<BlockId>, StoreError>;
}

/// Source-side view of the mutable pointers naming each writer's
/// current tree root.
#[async_trait]
pub trait MutablePointers: Send + Sync {
    /// The current signed pointer blob for a writer, if one exists.
    async fn get_pointer(
        &self,
        owner: &KeyHash,
        writer: &KeyHash,
    ) -> Result<Option<Vec<u8>>, PointerError>;

    /// Extract the tree root a pointer blob targets, `None` for a
    /// tombstone.
    async fn parse_pointer_target(
        &self,
        pointer: &[u8],
        writer: &KeyHash,
    ) -> Result<Option<BlockId>, PointerError>;
}

/// Destination-side pointer storage with optimistic concurrency.
#[async_trait]
pub trait TargetPointers: Send + Sync {
    async fn get_pointer(&self, writer: &KeyHash) -> Result<Option<Vec<u8>>, PointerError>;

    /// Compare-and-set the pointer for a writer. Returns `false` when
    /// the stored pointer no longer matches `expected`, leaving the
    /// stored value untouched.
    async fn set_pointer(
        &self,
        writer: &KeyHash,
        expected: Option<&[u8]>,
        updated: &[u8],
    ) -> Result<bool, PointerError>;
}

/// Directory of user identities and their storage placement.
#[async_trait]
pub trait IdentityIndex: Send + Sync {
    /// Every username known to the network.
    async fn usernames(&self) -> anyhow::Result<Vec<String>>;

    /// A user's identity key hash, if the username resolves.
    async fn identity(&self, username: &str) -> anyhow::Result<Option<KeyHash>>;

    /// The stores hosting a user's data.
    async fn storage_providers(&self, username: &str) -> anyhow::Result<Vec<StoreId>>;
}
