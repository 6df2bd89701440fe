/**
 * Cryptographic types and operations.
 *  - Writer keypairs and the key hashes that name
 *    owners and mutable-pointer namespaces
 *  - Symmetric content secrets and access tokens
 */
pub mod crypto;
/**
 * Content identifiers and dag-cbor linked data.
 * A block is either raw bytes or a structured node
 *  whose encoding carries links to child blocks;
 *  both are addressed purely by their content.
 */
pub mod linked_data;
/**
 * The chunked upload engine.
 * Splits a file into fixed-size encrypted chunks that
 *  form a forward-linked chain addressed by keys
 *  derived from a per-file stream secret.
 */
pub mod chunking;
/**
 * Store contracts and the mirror engine.
 * Declares the block-store capability traits, the
 *  collaborator interfaces (pointer stores, read
 *  authorizer, identity index) and the replication
 *  logic that copies a writer's DAG delta between
 *  stores.
 */
pub mod store;
/**
 * The usage-ledger contract consumed by the upload
 *  and mirror paths for quota accounting.
 */
pub mod usage;

pub mod prelude {
    pub use crate::chunking::{Chunk, FileUploader, StreamSecret};
    pub use crate::crypto::{Bat, BatWithId, KeyHash, PublicKey, Secret, SecretKey};
    pub use crate::linked_data::{BlockEncoded, BlockId, CodecError};
    pub use crate::store::{BlockStore, DeletableBlockStore, StoreError, StoreId, TransactionId};
}
