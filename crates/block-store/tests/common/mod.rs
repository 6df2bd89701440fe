#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ::common::chunking::{Committer, MapKey};
use ::common::crypto::{BatWithId, KeyHash, SigningWriter};
use ::common::linked_data::BlockId;
use ::common::store::{
    BlockStore, IdentityIndex, MutablePointers, OwnedKeys, PointerError, StoreError, StoreId,
    TargetPointers, TransactionId,
};

/// Routes test logging through the captured test writer. Safe to call
/// from every test; only the first call installs the subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pointer blobs in these tests are bare block-id bytes; an empty blob
/// is a tombstone.
pub fn pointer_blob(target: &BlockId) -> Vec<u8> {
    target.to_bytes()
}

/// Source-side pointer store keyed by (owner, writer).
#[derive(Default)]
pub struct MemoryPointers {
    pointers: Mutex<HashMap<(KeyHash, KeyHash), Vec<u8>>>,
}

impl MemoryPointers {
    pub fn set(&self, owner: KeyHash, writer: KeyHash, blob: Vec<u8>) {
        self.pointers.lock().insert((owner, writer), blob);
    }
}

#[async_trait]
impl MutablePointers for MemoryPointers {
    async fn get_pointer(
        &self,
        owner: &KeyHash,
        writer: &KeyHash,
    ) -> Result<Option<Vec<u8>>, PointerError> {
        Ok(self.pointers.lock().get(&(*owner, *writer)).cloned())
    }

    async fn parse_pointer_target(
        &self,
        pointer: &[u8],
        writer: &KeyHash,
    ) -> Result<Option<BlockId>, PointerError> {
        if pointer.is_empty() {
            return Ok(None);
        }
        BlockId::from_bytes(pointer)
            .map(Some)
            .map_err(|_| PointerError::Parse(*writer))
    }
}

/// Destination pointer store with compare-and-set semantics.
#[derive(Default)]
pub struct MemoryTargetPointers {
    pointers: Mutex<HashMap<KeyHash, Vec<u8>>>,
}

impl MemoryTargetPointers {
    pub fn current(&self, writer: &KeyHash) -> Option<Vec<u8>> {
        self.pointers.lock().get(writer).cloned()
    }

    pub fn force_set(&self, writer: KeyHash, blob: Vec<u8>) {
        self.pointers.lock().insert(writer, blob);
    }
}

#[async_trait]
impl TargetPointers for MemoryTargetPointers {
    async fn get_pointer(&self, writer: &KeyHash) -> Result<Option<Vec<u8>>, PointerError> {
        Ok(self.pointers.lock().get(writer).cloned())
    }

    async fn set_pointer(
        &self,
        writer: &KeyHash,
        expected: Option<&[u8]>,
        updated: &[u8],
    ) -> Result<bool, PointerError> {
        let mut pointers = self.pointers.lock();
        let current = pointers.get(writer).map(Vec::as_slice);
        if current != expected {
            return Ok(false);
        }
        pointers.insert(*writer, updated.to_vec());
        Ok(true)
    }
}

/// Committer binding chunk nodes to map keys in memory.
#[derive(Default)]
pub struct MemoryCommitter {
    roots: Mutex<HashMap<MapKey, BlockId>>,
}

impl MemoryCommitter {
    pub fn root(&self, map_key: &MapKey) -> Option<BlockId> {
        self.roots.lock().get(map_key).copied()
    }

    pub fn committed_count(&self) -> usize {
        self.roots.lock().len()
    }
}

#[async_trait]
impl Committer for MemoryCommitter {
    async fn current(
        &self,
        _owner: KeyHash,
        _writer: &SigningWriter,
        map_key: &MapKey,
    ) -> anyhow::Result<Option<BlockId>> {
        Ok(self.roots.lock().get(map_key).copied())
    }

    async fn commit(
        &self,
        _owner: KeyHash,
        _writer: &SigningWriter,
        map_key: &MapKey,
        existing: Option<&BlockId>,
        updated: &BlockId,
    ) -> anyhow::Result<()> {
        let mut roots = self.roots.lock();
        if roots.get(map_key) != existing {
            anyhow::bail!("stale commit for map key {map_key}");
        }
        roots.insert(*map_key, *updated);
        Ok(())
    }
}

/// Committer recording the expected-previous value of every commit.
#[derive(Default)]
pub struct RecordingCommitter {
    inner: MemoryCommitter,
    commits: Mutex<Vec<(Option<BlockId>, BlockId)>>,
}

impl RecordingCommitter {
    pub fn commits(&self) -> Vec<(Option<BlockId>, BlockId)> {
        self.commits.lock().clone()
    }
}

#[async_trait]
impl Committer for RecordingCommitter {
    async fn current(
        &self,
        owner: KeyHash,
        writer: &SigningWriter,
        map_key: &MapKey,
    ) -> anyhow::Result<Option<BlockId>> {
        self.inner.current(owner, writer, map_key).await
    }

    async fn commit(
        &self,
        owner: KeyHash,
        writer: &SigningWriter,
        map_key: &MapKey,
        existing: Option<&BlockId>,
        updated: &BlockId,
    ) -> anyhow::Result<()> {
        self.commits.lock().push((existing.copied(), *updated));
        self.inner.commit(owner, writer, map_key, existing, updated).await
    }
}

/// Identity directory backed by maps.
#[derive(Default)]
pub struct MemoryIdentities {
    pub users: Vec<String>,
    pub identities: HashMap<String, KeyHash>,
    pub providers: HashMap<String, Vec<StoreId>>,
}

#[async_trait]
impl IdentityIndex for MemoryIdentities {
    async fn usernames(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.users.clone())
    }

    async fn identity(&self, username: &str) -> anyhow::Result<Option<KeyHash>> {
        Ok(self.identities.get(username).copied())
    }

    async fn storage_providers(&self, username: &str) -> anyhow::Result<Vec<StoreId>> {
        Ok(self.providers.get(username).cloned().unwrap_or_default())
    }
}

/// Owned-key resolver backed by a map; absent writers own nothing.
#[derive(Default)]
pub struct MemoryOwned {
    pub owned: HashMap<KeyHash, HashSet<KeyHash>>,
}

#[async_trait]
impl OwnedKeys for MemoryOwned {
    async fn direct_owned(
        &self,
        _owner: &KeyHash,
        writer: &KeyHash,
    ) -> anyhow::Result<HashSet<KeyHash>> {
        Ok(self.owned.get(writer).cloned().unwrap_or_default())
    }
}

/// Wrapper injecting a put failure after a set number of successes.
pub struct FailingStore<S> {
    inner: Arc<S>,
    puts_before_failure: AtomicIsize,
}

impl<S> FailingStore<S> {
    pub fn new(inner: Arc<S>, puts_before_failure: isize) -> Self {
        Self {
            inner,
            puts_before_failure: AtomicIsize::new(puts_before_failure),
        }
    }
}

#[async_trait]
impl<S: BlockStore> BlockStore for FailingStore<S> {
    fn id(&self) -> StoreId {
        self.inner.id()
    }

    async fn start_transaction(&self, owner: KeyHash) -> Result<TransactionId, StoreError> {
        self.inner.start_transaction(owner).await
    }

    async fn close_transaction(
        &self,
        owner: KeyHash,
        tid: TransactionId,
    ) -> Result<(), StoreError> {
        self.inner.close_transaction(owner, tid).await
    }

    async fn put(
        &self,
        owner: KeyHash,
        writer: KeyHash,
        blocks: Vec<Bytes>,
        raw: bool,
        tid: TransactionId,
    ) -> Result<Vec<BlockId>, StoreError> {
        if self.puts_before_failure.fetch_sub(1, Ordering::SeqCst) <= 0 {
            return Err(StoreError::State("injected put failure".into()));
        }
        self.inner.put(owner, writer, blocks, raw, tid).await
    }

    async fn get(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(block, bat).await
    }

    async fn get_links(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Vec<BlockId>, StoreError> {
        self.inner.get_links(block, bat).await
    }

    async fn get_size(&self, block: &BlockId) -> Result<Option<usize>, StoreError> {
        self.inner.get_size(block).await
    }

    async fn has_block(&self, block: &BlockId) -> Result<bool, StoreError> {
        self.inner.has_block(block).await
    }
}
