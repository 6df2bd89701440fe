use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use common::crypto::KeyHash;
use common::linked_data::BlockId;
use common::store::{StoreError, TransactionId};

/// In-memory record of which blocks each open transaction has written.
///
/// Blocks recorded here count as reachable for garbage collection
/// until their transaction closes, covering the window between a put
/// and the pointer update that makes the block reachable.
#[derive(Default)]
pub struct TransactionLedger {
    open: Mutex<HashMap<(KeyHash, TransactionId), HashSet<BlockId>>>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, owner: KeyHash) -> TransactionId {
        let tid = TransactionId::generate();
        self.open.lock().insert((owner, tid), HashSet::new());
        tid
    }

    /// Record blocks written under an open transaction. Writing under
    /// an unknown transaction is a caller bug and fails.
    pub fn record(
        &self,
        owner: KeyHash,
        tid: TransactionId,
        blocks: &[BlockId],
    ) -> Result<(), StoreError> {
        let mut open = self.open.lock();
        let pinned = open.get_mut(&(owner, tid)).ok_or_else(|| {
            StoreError::State(format!("no open transaction {tid} for owner {owner}"))
        })?;
        pinned.extend(blocks.iter().copied());
        Ok(())
    }

    /// Close a transaction, releasing its blocks to garbage collection.
    /// Closing an already-closed transaction is a no-op.
    pub fn close(&self, owner: KeyHash, tid: TransactionId) {
        self.open.lock().remove(&(owner, tid));
    }

    /// Every block still protected by an open transaction.
    pub fn open_blocks(&self) -> HashSet<BlockId> {
        self.open.lock().values().flatten().copied().collect()
    }
}
