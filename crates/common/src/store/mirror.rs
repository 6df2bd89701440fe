use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::crypto::{BatWithId, KeyHash};
use crate::linked_data::BlockId;

use super::owned::{owned_keys_recursive, OwnedKeys};
use super::traits::{
    BlockStore, IdentityIndex, MutablePointers, PointerError, StoreError, StoreId, TargetPointers,
    TransactionId,
};

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("source is missing block {0}")]
    MissingSource(BlockId),
    #[error("pointer for writer {0} changed during mirror")]
    StalePointer(KeyHash),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pointer(#[from] PointerError),
    #[error("mirror error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Mirror every user whose data is hosted on `node`, returning the
/// number of users mirrored successfully.
///
/// One user failing does not abort the run; the failure is logged and
/// the remaining users are still mirrored.
#[allow(clippy::too_many_arguments)]
pub async fn mirror_node(
    node: &StoreId,
    bat: Option<&BatWithId>,
    identities: &dyn IdentityIndex,
    pointers: &dyn MutablePointers,
    owned: &dyn OwnedKeys,
    source: &dyn BlockStore,
    dest: &dyn BlockStore,
    dest_pointers: &dyn TargetPointers,
) -> Result<usize, MirrorError> {
    info!("mirroring data for node {node}");
    let mut mirrored = 0;
    for username in identities.usernames().await? {
        let providers = identities.storage_providers(&username).await?;
        if !providers.contains(node) {
            continue;
        }
        match mirror_user(
            &username,
            bat,
            identities,
            pointers,
            owned,
            source,
            dest,
            dest_pointers,
        )
        .await
        {
            Ok(_) => mirrored += 1,
            Err(e) => warn!("couldn't mirror user {username}: {e}"),
        }
    }
    info!("finished mirroring node {node}, with {mirrored} users");
    Ok(mirrored)
}

/// Mirror all of one user's writer subspaces, returning the pointer
/// version mirrored for each writer.
#[allow(clippy::too_many_arguments)]
pub async fn mirror_user(
    username: &str,
    bat: Option<&BatWithId>,
    identities: &dyn IdentityIndex,
    pointers: &dyn MutablePointers,
    owned: &dyn OwnedKeys,
    source: &dyn BlockStore,
    dest: &dyn BlockStore,
    dest_pointers: &dyn TargetPointers,
) -> Result<HashMap<KeyHash, Vec<u8>>, MirrorError> {
    info!("mirroring data for {username}");
    let Some(identity) = identities.identity(username).await? else {
        return Ok(HashMap::new());
    };
    let writers = owned_keys_recursive(owned, &identity, &identity).await?;
    let mut versions = HashMap::new();
    for writer in writers {
        let mirrored = mirror_mutable_subspace(
            identity,
            writer,
            bat,
            pointers,
            source,
            dest,
            dest_pointers,
        )
        .await?;
        if let Some(pointer) = mirrored {
            versions.insert(writer, pointer);
        }
    }
    info!("finished mirroring data for {username}");
    Ok(versions)
}

/// Mirror one writer's tree, returning the pointer version mirrored,
/// or `None` if the source has no pointer for the writer.
pub async fn mirror_mutable_subspace(
    owner: KeyHash,
    writer: KeyHash,
    bat: Option<&BatWithId>,
    pointers: &dyn MutablePointers,
    source: &dyn BlockStore,
    dest: &dyn BlockStore,
    dest_pointers: &dyn TargetPointers,
) -> Result<Option<Vec<u8>>, MirrorError> {
    let Some(updated) = pointers.get_pointer(&owner, &writer).await? else {
        warn!("skipping unretrievable mutable pointer for {writer}");
        return Ok(None);
    };
    mirror_merkle_tree(
        owner,
        writer,
        &updated,
        bat,
        pointers,
        source,
        dest,
        dest_pointers,
    )
    .await?;
    Ok(Some(updated))
}

/// Copy the tree behind `updated_pointer` to the destination and
/// advance the destination's pointer, returning the number of blocks
/// copied.
///
/// Blocks are pinned before the pointer moves: a failure partway
/// through leaves the destination pointing at its previous complete
/// tree, never at a partially copied one.
#[allow(clippy::too_many_arguments)]
pub async fn mirror_merkle_tree(
    owner: KeyHash,
    writer: KeyHash,
    updated_pointer: &[u8],
    bat: Option<&BatWithId>,
    pointers: &dyn MutablePointers,
    source: &dyn BlockStore,
    dest: &dyn BlockStore,
    dest_pointers: &dyn TargetPointers,
) -> Result<usize, MirrorError> {
    let existing = dest_pointers.get_pointer(&writer).await?;
    let existing_target = match &existing {
        Some(pointer) => pointers.parse_pointer_target(pointer, &writer).await?,
        None => None,
    };
    let updated_target = pointers.parse_pointer_target(updated_pointer, &writer).await?;

    let tid = dest.start_transaction(owner).await?;
    let result = async {
        let copied = mirror_blocks(
            owner,
            writer,
            existing_target,
            updated_target,
            bat,
            source,
            dest,
            tid,
        )
        .await?;
        let committed = dest_pointers
            .set_pointer(&writer, existing.as_deref(), updated_pointer)
            .await?;
        if !committed {
            return Err(MirrorError::StalePointer(writer));
        }
        Ok(copied)
    }
    .await;
    // the transaction closes whether or not the copy succeeded
    let closed = dest.close_transaction(owner, tid).await;
    let copied = result?;
    closed?;
    Ok(copied)
}

/// Copy every block reachable from `updated_root` that the destination
/// is missing, skipping subtrees shared with `existing_root`.
#[allow(clippy::too_many_arguments)]
pub async fn mirror_blocks(
    owner: KeyHash,
    writer: KeyHash,
    existing_root: Option<BlockId>,
    updated_root: Option<BlockId>,
    bat: Option<&BatWithId>,
    source: &dyn BlockStore,
    dest: &dyn BlockStore,
    tid: TransactionId,
) -> Result<usize, MirrorError> {
    let Some(updated_root) = updated_root else {
        return Ok(0);
    };
    let retained = match existing_root {
        Some(root) => reachable_at_dest(dest, root).await?,
        None => HashSet::new(),
    };

    let mut copied = 0;
    let mut visited = HashSet::new();
    let mut pending = vec![updated_root];
    while let Some(block) = pending.pop() {
        if !visited.insert(block) || block.is_identity() {
            continue;
        }
        let present = dest.has_block(&block).await?;
        if present && retained.contains(&block) {
            // unchanged subtree shared with the previous version
            continue;
        }
        if !present {
            let data = source
                .get(&block, bat)
                .await?
                .ok_or(MirrorError::MissingSource(block))?;
            let stored = dest
                .put(owner, writer, vec![data], block.is_raw(), tid)
                .await?;
            if stored.first() != Some(&block) {
                return Err(StoreError::State(format!(
                    "copied block hashed to a different identifier than {block}"
                ))
                .into());
            }
            copied += 1;
        }
        pending.extend(source.get_links(&block, bat).await?);
    }
    Ok(copied)
}

/// The blocks reachable from `root` that the destination already holds.
async fn reachable_at_dest(
    dest: &dyn BlockStore,
    root: BlockId,
) -> Result<HashSet<BlockId>, MirrorError> {
    let mut present = HashSet::new();
    let mut pending = vec![root];
    while let Some(block) = pending.pop() {
        if !present.insert(block) {
            continue;
        }
        if block.is_identity() {
            continue;
        }
        if !dest.has_block(&block).await? {
            present.remove(&block);
            continue;
        }
        pending.extend(dest.get_links(&block, None).await?);
    }
    Ok(present)
}
