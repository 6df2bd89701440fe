use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::crypto::KeyHash;
use crate::linked_data::BlockId;

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("expected exactly one {0} row updated")]
    RowCount(&'static str),
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("unknown writer {0}")]
    UnknownWriter(KeyHash),
    #[error("usage error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A user's storage footprint: confirmed bytes plus any usage reserved
/// for writes still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserUsage {
    pub total_bytes: u64,
    pub errored: bool,
    pub pending: HashMap<KeyHash, u64>,
}

impl UserUsage {
    /// Confirmed plus reserved usage, the figure quota checks compare
    /// against.
    pub fn total_with_pending(&self) -> u64 {
        self.total_bytes + self.pending.values().sum::<u64>()
    }
}

/// One writer's recorded footprint after its latest successful commit
/// or mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterUsage {
    pub owner: String,
    pub target: Option<BlockId>,
    pub direct_bytes: u64,
    pub owned: HashSet<KeyHash>,
}

/// Persistent ledger of per-user and per-writer storage usage.
///
/// The upload path reserves usage *before* a risky write with
/// [`add_pending_usage`](UsageStore::add_pending_usage) and reconciles
/// it exactly once per attempt with
/// [`confirm_usage`](UsageStore::confirm_usage), success or failure.
/// That ordering bounds the window during which quota checks can
/// under-count in-flight writes.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Register a user, a no-op if they already exist.
    async fn add_user_if_absent(&self, username: &str) -> Result<(), UsageError>;

    /// Register a writer under a user's account.
    async fn add_writer(&self, username: &str, writer: &KeyHash) -> Result<(), UsageError>;

    /// Reserve `delta_bytes` of unconfirmed usage for a pending write.
    async fn add_pending_usage(
        &self,
        username: &str,
        writer: &KeyHash,
        delta_bytes: u64,
    ) -> Result<(), UsageError>;

    /// Reconcile a finished write: fold `delta_bytes` into the user's
    /// confirmed total, zero the writer's pending count, and record
    /// whether the attempt errored.
    async fn confirm_usage(
        &self,
        username: &str,
        writer: &KeyHash,
        delta_bytes: u64,
        errored: bool,
    ) -> Result<(), UsageError>;

    /// Record a writer's footprint and owned-writer set after a
    /// successful commit or mirror. Replaces the previous owned set
    /// wholesale.
    async fn update_writer_usage(
        &self,
        writer: &KeyHash,
        target: Option<BlockId>,
        owned: HashSet<KeyHash>,
        retained_bytes: u64,
    ) -> Result<(), UsageError>;

    async fn user_usage(&self, username: &str) -> Result<UserUsage, UsageError>;

    async fn writer_usage(&self, writer: &KeyHash) -> Result<WriterUsage, UsageError>;

    /// The writers directly owned by `writer`, from the last recorded
    /// owned set.
    async fn direct_owned(&self, writer: &KeyHash) -> Result<HashSet<KeyHash>, UsageError>;

    async fn all_users(&self) -> Result<Vec<String>, UsageError>;
}
