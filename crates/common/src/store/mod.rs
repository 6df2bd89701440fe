mod mirror;
mod owned;
mod traits;

pub use mirror::{
    mirror_blocks, mirror_merkle_tree, mirror_mutable_subspace, mirror_node, mirror_user,
    MirrorError,
};
pub use owned::{owned_keys_recursive, OwnedKeys};
pub use traits::{
    AllowAll, BlockAuthorizer, BlockStore, DeletableBlockStore, IdentityIndex, MutablePointers,
    PointerError, StoreError, StoreId, TargetPointers, TransactionId,
};
