use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use common::crypto::{BatWithId, KeyHash};
use common::linked_data::{block_links, BlockId};
use common::store::{BlockStore, DeletableBlockStore, StoreError, StoreId, TransactionId};

use crate::transactions::TransactionLedger;

/// An in-process block store with the same semantics as the
/// directory-backed one. Used in tests and as the second node in
/// replication scenarios.
pub struct MemoryBlockStore {
    id: StoreId,
    blocks: Mutex<HashMap<BlockId, Bytes>>,
    transactions: TransactionLedger,
}

impl MemoryBlockStore {
    pub fn new(identity: &[u8]) -> Self {
        Self {
            id: StoreId::derive(identity),
            blocks: Mutex::new(HashMap::new()),
            transactions: TransactionLedger::new(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
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
        self.transactions.record(owner, tid, &ids)?;
        let mut stored = self.blocks.lock();
        for (block, data) in ids.iter().zip(blocks) {
            stored.entry(*block).or_insert(data);
        }
        Ok(ids)
    }

    async fn get(
        &self,
        block: &BlockId,
        _bat: Option<&BatWithId>,
    ) -> Result<Option<Bytes>, StoreError> {
        if let Some(payload) = block.identity_payload() {
            return Ok(Some(Bytes::from(payload)));
        }
        Ok(self.blocks.lock().get(block).cloned())
    }

    async fn get_links(
        &self,
        block: &BlockId,
        bat: Option<&BatWithId>,
    ) -> Result<Vec<BlockId>, StoreError> {
        if block.is_raw() {
            return Ok(Vec::new());
        }
        match self.get(block, bat).await? {
            Some(data) => Ok(block_links(&data)?),
            None => Ok(Vec::new()),
        }
    }

    async fn get_size(&self, block: &BlockId) -> Result<Option<usize>, StoreError> {
        if let Some(payload) = block.identity_payload() {
            return Ok(Some(payload.len()));
        }
        Ok(self.blocks.lock().get(block).map(Bytes::len))
    }

    async fn has_block(&self, block: &BlockId) -> Result<bool, StoreError> {
        Ok(block.is_identity() || self.blocks.lock().contains_key(block))
    }
}

#[async_trait]
impl DeletableBlockStore for MemoryBlockStore {
    async fn delete(&self, block: &BlockId) -> Result<(), StoreError> {
        self.blocks.lock().remove(block);
        Ok(())
    }

    async fn retain_only(&self, keep: &HashSet<BlockId>) -> Result<HashSet<BlockId>, StoreError> {
        let protected = self.transactions.open_blocks();
        let mut stored = self.blocks.lock();
        let doomed: HashSet<BlockId> = stored
            .keys()
            .filter(|b| !keep.contains(b) && !protected.contains(b))
            .copied()
            .collect();
        for block in &doomed {
            stored.remove(block);
        }
        Ok(doomed)
    }

    async fn open_transaction_blocks(&self) -> Result<HashSet<BlockId>, StoreError> {
        Ok(self.transactions.open_blocks())
    }
}
