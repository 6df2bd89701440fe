/**
 * Block store implementations.
 *  - [`FileBlockStore`]: a directory-backed store with atomic writes
 *    and a fanned-out layout keyed by content identifier
 *  - [`MemoryBlockStore`]: an in-process store for tests and as the
 *    second node in replication scenarios
 * Both share the [`TransactionLedger`], which protects in-flight
 *  blocks from garbage collection until their transaction closes.
 */
mod file;
mod memory;
mod transactions;

pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;
pub use transactions::TransactionLedger;
