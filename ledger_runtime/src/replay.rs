//! Replay orchestrator: rebuild ledger state from a block sequence.
//!
//! Delegates every state transition to the kernel. No cached state, no
//! shortcuts: the result depends only on settings and blocks.

use ledger_kernel::engine::{HaltExecutor, TransactionExecutor};
use ledger_kernel::error::StorageError;
use ledger_kernel::hashing::state_hash;
use ledger_kernel::settings::ProtocolSettings;
use ledger_kernel::storage::{MemoryStore, ReadOnlyStore};

use crate::blockchain::{Blockchain, BlockchainError};

/// Hash of every key-value pair visible in `store`.
pub fn store_state_hash(store: &dyn ReadOnlyStore) -> Result<String, StorageError> {
    let pairs = store.find(&[])?;
    Ok(state_hash(pairs.iter().map(|(k, v)| (k, v))))
}

/// Rebuild state from `blocks` with transactions run by `executor`.
///
/// `blocks` starts at genesis, which must equal the genesis the settings
/// produce; it is persisted when the chain opens.
pub fn rebuild_state_with(
    settings: &ProtocolSettings,
    blocks: &[ledger_kernel::domain::Block],
    executor: &mut dyn TransactionExecutor,
) -> Result<(MemoryStore, String), BlockchainError> {
    let mut chain = Blockchain::open(MemoryStore::new(), settings.clone())?;
    let genesis_hash = chain.current_hash()?;
    for block in blocks {
        if block.index() == 0 && block.hash() == genesis_hash {
            continue;
        }
        chain.persist(block, executor)?;
    }
    let hash = store_state_hash(chain.store())?;
    Ok((chain.store().clone(), hash))
}

/// Rebuild with every transaction halting without side effects.
pub fn rebuild_state(
    settings: &ProtocolSettings,
    blocks: &[ledger_kernel::domain::Block],
) -> Result<(MemoryStore, String), BlockchainError> {
    rebuild_state_with(settings, blocks, &mut HaltExecutor)
}

/// Rebuild and keep only the state hash.
pub fn rebuild_hash(
    settings: &ProtocolSettings,
    blocks: &[ledger_kernel::domain::Block],
) -> Result<String, BlockchainError> {
    rebuild_state(settings, blocks).map(|(_, hash)| hash)
}
