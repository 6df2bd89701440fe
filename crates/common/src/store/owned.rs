use std::collections::HashSet;

use async_trait::async_trait;

use crate::crypto::KeyHash;

/// Resolves the writer keys a given writer directly owns.
///
/// Each writer's tree records which sub-writers it delegated parts of
/// the namespace to; mirroring a user means mirroring every writer
/// reachable from their identity through this relation.
#[async_trait]
pub trait OwnedKeys: Send + Sync {
    async fn direct_owned(
        &self,
        owner: &KeyHash,
        writer: &KeyHash,
    ) -> anyhow::Result<HashSet<KeyHash>>;
}

/// The transitive closure of the owned-writer relation from `root`,
/// including `root` itself.
///
/// The ownership graph is acyclic in practice; the visited set makes
/// traversal terminate even on a corrupt cyclic graph.
pub async fn owned_keys_recursive(
    resolver: &dyn OwnedKeys,
    owner: &KeyHash,
    root: &KeyHash,
) -> anyhow::Result<HashSet<KeyHash>> {
    let mut visited = HashSet::new();
    let mut pending = vec![*root];
    while let Some(writer) = pending.pop() {
        if !visited.insert(writer) {
            continue;
        }
        for owned in resolver.direct_owned(owner, &writer).await? {
            if !visited.contains(&owned) {
                pending.push(owned);
            }
        }
    }
    Ok(visited)
}
