use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, trace};
use uuid::Uuid;

use common::crypto::{BatWithId, KeyHash};
use common::linked_data::{block_links, BlockId};
use common::store::{
    BlockAuthorizer, BlockStore, DeletableBlockStore, StoreError, StoreId, TransactionId,
};

use crate::transactions::TransactionLedger;

/// Directory fan-out depth for stored blocks
const DIRECTORY_DEPTH: usize = 5;

const TMP_DIR: &str = ".tmp";

/// A block store persisting each block as one file under a directory
/// tree fanned out on the trailing characters of its identifier.
///
/// Writes go to a temp file first and are renamed into place, so a
/// crash never leaves a partially written block under a valid name, and
/// concurrent writers of identical content cannot corrupt each other.
pub struct FileBlockStore {
    root: PathBuf,
    id: StoreId,
    authorizer: Box<dyn BlockAuthorizer>,
    transactions: TransactionLedger,
}

impl FileBlockStore {
    pub async fn new(
        root: impl Into<PathBuf>,
        identity: &[u8],
        authorizer: Box<dyn BlockAuthorizer>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self {
            root,
            id: StoreId::derive(identity),
            authorizer,
            transactions: TransactionLedger::new(),
        })
    }

    /// Path of a block: one directory level per trailing identifier
    /// character, then the full identifier as the file name. Trailing
    /// characters of the base32 digest are uniformly distributed, so
    /// the fan-out stays balanced.
    fn block_path(&self, block: &BlockId) -> PathBuf {
        let name = block.to_string();
        let mut path = self.root.clone();
        for c in name.chars().rev().take(DIRECTORY_DEPTH) {
            path.push(c.to_string());
        }
        path.join(name)
    }

    async fn read_block(&self, block: &BlockId) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(payload) = block.identity_payload() {
            return Ok(Some(payload));
        }
        match fs::read(self.block_path(block)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_block(&self, block: &BlockId, data: &[u8]) -> Result<(), StoreError> {
        let target = self.block_path(block);
        if fs::try_exists(&target).await? {
            // content-addressed: an existing file already holds these bytes
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &target).await?;
        trace!(block = %block, bytes = data.len(), "stored block");
        Ok(())
    }

    /// Every block file currently in the store. Foreign files in the
    /// tree are skipped with a log line rather than treated as
    /// corruption.
    async fn all_blocks(&self) -> Result<HashSet<BlockId>, StoreError> {
        let mut blocks = HashSet::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if path != self.root.join(TMP_DIR) {
                        pending.push(path);
                    }
                    continue;
                }
                let name = entry.file_name();
                match name.to_string_lossy().parse::<BlockId>() {
                    Ok(block) => {
                        blocks.insert(block);
                    }
                    Err(_) => debug!(path = %path.display(), "skipping foreign file in store"),
                }
            }
        }
        Ok(blocks)
    }
}

#[async_trait]
impl BlockStore for FileBlockStore {
    fn id(&self) -> StoreId {
        self.id
    }

    async fn start_transaction(&self, owner: KeyHash) -> Result<TransactionId, StoreError> {
        Ok(self.transactions.start(owner))
    }

    async fn close_transaction(
        &self,
        owner: KeyHash,
        tid: TransactionId,
    ) -> Result<(), StoreError> {
        self.transactions.close(owner, tid);
        Ok(())
    }

    async fn put(
        &self,
        owner: KeyHash,
        _writer: KeyHash,
        blocks: Vec<Bytes>,
        raw: bool,
        tid: TransactionId,
    ) -> Result<Vec<BlockId>, StoreError> {
        let ids: Vec<BlockId> = blocks.iter().map(|data| BlockId::compute(data, raw)).collect();
        // register with the transaction ledger before writing, so a
        // concurrent GC pass never reaps a block mid-put
        self.transactions.record(owner, tid, &ids)?;
        for (block, data) in ids.iter().zip(&blocks) {
            self.write_block(block, data).await?;
        }
        Ok(ids)
    }

    async fn get(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Option<Bytes>, StoreError> {
        if !self.authorizer.allow_read(block, bat).await? {
            return Err(StoreError::Unauthorized(*block));
        }
        Ok(self.read_block(block).await?.map(Bytes::from))
    }

    async fn get_links(
        &self,
        block: &BlockId,
        _bat: Option<&BatWithId>,
    ) -> Result<Vec<BlockId>, StoreError> {
        if block.is_raw() {
            return Ok(Vec::new());
        }
        match self.read_block(block).await? {
            Some(data) => Ok(block_links(&data)?),
            None => Ok(Vec::new()),
        }
    }

    async fn get_size(&self, block: &BlockId) -> Result<Option<usize>, StoreError> {
        if let Some(payload) = block.identity_payload() {
            return Ok(Some(payload.len()));
        }
        match fs::metadata(self.block_path(block)).await {
            Ok(meta) => Ok(Some(meta.len() as usize)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_block(&self, block: &BlockId) -> Result<bool, StoreError> {
        if block.is_identity() {
            return Ok(true);
        }
        Ok(fs::try_exists(self.block_path(block)).await?)
    }
}

#[async_trait]
impl DeletableBlockStore for FileBlockStore {
    async fn delete(&self, block: &BlockId) -> Result<(), StoreError> {
        match fs::remove_file(self.block_path(block)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn retain_only(&self, keep: &HashSet<BlockId>) -> Result<HashSet<BlockId>, StoreError> {
        let protected = self.transactions.open_blocks();
        let mut deleted = HashSet::new();
        for block in self.all_blocks().await? {
            if keep.contains(&block) || protected.contains(&block) {
                continue;
            }
            self.delete(&block).await?;
            deleted.insert(block);
        }
        debug!(deleted = deleted.len(), "garbage collection pass complete");
        Ok(deleted)
    }

    async fn open_transaction_blocks(&self) -> Result<HashSet<BlockId>, StoreError> {
        Ok(self.transactions.open_blocks())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::store::AllowAll;

    fn owner() -> KeyHash {
        KeyHash::from([1u8; 32])
    }

    fn writer() -> KeyHash {
        KeyHash::from([2u8; 32])
    }

    async fn store() -> (tempfile::TempDir, FileBlockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlockStore::new(dir.path(), b"test-node", Box::new(AllowAll))
            .await
            .unwrap();
        (dir, store)
    }

    async fn put_one(store: &FileBlockStore, data: &[u8], raw: bool) -> BlockId {
        let tid = store.start_transaction(owner()).await.unwrap();
        let ids = store
            .put(owner(), writer(), vec![Bytes::copy_from_slice(data)], raw, tid)
            .await
            .unwrap();
        store.close_transaction(owner(), tid).await.unwrap();
        ids[0]
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = store().await;
        let block = put_one(&store, b"some block bytes", true).await;
        let fetched = store.get(&block, None).await.unwrap().unwrap();
        assert_eq!(&fetched[..], b"some block bytes");
        assert_eq!(store.get_size(&block).await.unwrap(), Some(16));
        assert!(store.has_block(&block).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (_dir, store) = store().await;
        let a = put_one(&store, b"same bytes", true).await;
        let b = put_one(&store, b"same bytes", true).await;
        assert_eq!(a, b);
        assert_eq!(store.all_blocks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_absent_block_is_none_not_error() {
        let (_dir, store) = store().await;
        let absent = BlockId::raw(b"never stored");
        assert_eq!(store.get(&absent, None).await.unwrap(), None);
        assert_eq!(store.get_size(&absent).await.unwrap(), None);
        assert!(!store.has_block(&absent).await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_block_resolves_without_storage() {
        let (_dir, store) = store().await;
        let inline = BlockId::identity(b"inline value").unwrap();
        let fetched = store.get(&inline, None).await.unwrap().unwrap();
        assert_eq!(&fetched[..], b"inline value");
        assert!(store.has_block(&inline).await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_read_rejected() {
        struct DenyAll;

        #[async_trait]
        impl BlockAuthorizer for DenyAll {
            async fn allow_read(
                &self,
                _block: &BlockId,
                _bat: Option<&BatWithId>,
            ) -> Result<bool, StoreError> {
                Ok(false)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = FileBlockStore::new(dir.path(), b"test-node", Box::new(DenyAll))
            .await
            .unwrap();
        let tid = store.start_transaction(owner()).await.unwrap();
        let ids = store
            .put(owner(), writer(), vec![Bytes::from_static(b"secret")], true, tid)
            .await
            .unwrap();
        store.close_transaction(owner(), tid).await.unwrap();

        let result = store.get(&ids[0], None).await;
        assert!(matches!(result, Err(StoreError::Unauthorized(id)) if id == ids[0]));
        // link extraction stays available without authorization
        assert_eq!(store.get_links(&ids[0], None).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn test_retain_only_deletes_the_rest() {
        let (_dir, store) = store().await;
        let a = put_one(&store, b"block a", true).await;
        let b = put_one(&store, b"block b", true).await;
        let c = put_one(&store, b"block c", true).await;

        let keep = HashSet::from([a, b]);
        let deleted = store.retain_only(&keep).await.unwrap();
        assert_eq!(deleted, HashSet::from([c]));
        assert!(store.has_block(&a).await.unwrap());
        assert!(store.has_block(&b).await.unwrap());
        assert!(!store.has_block(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_transaction_protects_from_gc() {
        let (_dir, store) = store().await;
        let tid = store.start_transaction(owner()).await.unwrap();
        let ids = store
            .put(owner(), writer(), vec![Bytes::from_static(b"in flight")], true, tid)
            .await
            .unwrap();

        let deleted = store.retain_only(&HashSet::new()).await.unwrap();
        assert!(deleted.is_empty());
        assert!(store.has_block(&ids[0]).await.unwrap());

        store.close_transaction(owner(), tid).await.unwrap();
        let deleted = store.retain_only(&HashSet::new()).await.unwrap();
        assert_eq!(deleted, HashSet::from([ids[0]]));
    }

    #[tokio::test]
    async fn test_foreign_files_tolerated() {
        let (dir, store) = store().await;
        tokio::fs::write(dir.path().join("README"), b"not a block")
            .await
            .unwrap();
        let block = put_one(&store, b"real block", true).await;
        let all = store.all_blocks().await.unwrap();
        assert_eq!(all, HashSet::from([block]));
    }

    #[tokio::test]
    async fn test_structured_block_links() {
        use common::linked_data::BlockEncoded;
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        struct Node {
            children: Vec<BlockId>,
        }
        impl BlockEncoded for Node {}

        let (_dir, store) = store().await;
        let leaf = put_one(&store, b"leaf", true).await;
        let node = Node { children: vec![leaf] };
        let encoded = node.encode().unwrap();
        let tid = store.start_transaction(owner()).await.unwrap();
        let ids = store
            .put(owner(), writer(), vec![Bytes::from(encoded)], false, tid)
            .await
            .unwrap();
        store.close_transaction(owner(), tid).await.unwrap();

        assert_eq!(store.get_links(&ids[0], None).await.unwrap(), vec![leaf]);
        assert_eq!(store.get_links(&leaf, None).await.unwrap(), Vec::new());
    }
}
