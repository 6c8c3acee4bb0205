//! Block driver: genesis on first open, validate-before-apply, commit.
//!
//! Apply order for every block:
//!   1. `try_validate_block` against the current tip, rejecting bad
//!      input with a typed error before the kernel sees it
//!   2. `persist_block` on a fresh snapshot, producing a changeset
//!   3. `Store::commit`, only if step 2 succeeded
//!
//! Concurrency: `SharedBlockchain` serialises writers behind a Mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ledger_kernel::domain::{Block, Header, UInt256};
use ledger_kernel::engine::{persist_block, HaltExecutor, PersistedBlock, TransactionExecutor};
use ledger_kernel::error::StorageError;
use ledger_kernel::interop::BlockRef;
use ledger_kernel::invariants::try_validate_block;
use ledger_kernel::native::NativeRegistry;
use ledger_kernel::settings::ProtocolSettings;
use ledger_kernel::storage::{DataCache, ReadOnlyStore, Store};
use thiserror::Error;
use tracing::{info, warn};

/// Fixed genesis header fields. Every node derives the same genesis hash
/// from the same settings.
const GENESIS_TIMESTAMP: u64 = 1_468_595_301_000;
const GENESIS_NONCE: u64 = 2_083_236_893;

#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("block {index} carries {count} transactions, limit is {limit}")]
    TooManyTransactions { index: u32, count: usize, limit: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The block every chain with these settings starts from.
pub fn genesis_block(settings: &ProtocolSettings) -> Block {
    Block {
        header: Header {
            version: 0,
            prev_hash: UInt256::ZERO,
            merkle_root: UInt256::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            nonce: GENESIS_NONCE,
            index: 0,
            primary_index: 0,
            next_consensus: settings.genesis_holder(),
        },
        transactions: Vec::new(),
    }
}

pub struct Blockchain<S: Store> {
    store: S,
    registry: NativeRegistry,
    settings: ProtocolSettings,
}

impl<S: Store> Blockchain<S> {
    /// Wrap `store`, persisting the genesis block if the ledger is empty.
    pub fn open(store: S, settings: ProtocolSettings) -> Result<Self, BlockchainError> {
        let mut chain = Self {
            store,
            registry: NativeRegistry::new(),
            settings,
        };
        if !chain.registry.ledger().initialized(&chain.snapshot())? {
            let genesis = genesis_block(&chain.settings);
            chain.persist(&genesis, &mut HaltExecutor)?;
        } else {
            let ledger = chain.registry.ledger();
            let cache = chain.snapshot();
            info!(
                height = ledger.current_index(&cache)?,
                hash = %ledger.current_hash(&cache)?,
                "blockchain resumed"
            );
        }
        Ok(chain)
    }

    /// Validate, apply and commit one block.
    pub fn persist(
        &mut self,
        block: &Block,
        executor: &mut dyn TransactionExecutor,
    ) -> Result<PersistedBlock, BlockchainError> {
        let count = block.transactions.len();
        if count > self.settings.max_transactions_per_block as usize {
            return Err(BlockchainError::TooManyTransactions {
                index: block.index(),
                count,
                limit: self.settings.max_transactions_per_block,
            });
        }

        // Step 1: reject before entering the kernel, where these checks are fatal.
        let tip = self.registry.ledger().current_tip(&self.snapshot())?;
        if let Err(reason) = try_validate_block(block, tip.as_ref(), self.settings.validators_count) {
            warn!(index = block.index(), %reason, "block rejected");
            return Err(BlockchainError::InvalidBlock(reason));
        }

        // Step 2: apply.
        let persisted = persist_block(
            self.store.snapshot(),
            &self.registry,
            &self.settings,
            block,
            executor,
        )?;

        // Step 3: commit.
        self.store.commit(&persisted.change_set)?;
        info!(
            index = persisted.index,
            hash = %persisted.hash,
            transactions = count,
            writes = persisted.change_set.len(),
            "block committed"
        );
        Ok(persisted)
    }

    /// Fresh data cache over the latest committed state.
    pub fn snapshot(&self) -> DataCache {
        DataCache::new(self.store.snapshot())
    }

    pub fn store_snapshot(&self) -> Arc<dyn ReadOnlyStore> {
        self.store.snapshot()
    }

    pub fn height(&self) -> Result<u32, StorageError> {
        self.registry.ledger().current_index(&self.snapshot())
    }

    pub fn current_hash(&self) -> Result<UInt256, StorageError> {
        self.registry.ledger().current_hash(&self.snapshot())
    }

    pub fn get_block(&self, index: u32) -> Result<Option<Block>, StorageError> {
        self.registry
            .ledger()
            .get_block(&self.snapshot(), &BlockRef::Index(index))
    }

    /// Every persisted block from genesis to the tip.
    pub fn export_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let cache = self.snapshot();
        let ledger = self.registry.ledger();
        let height = ledger.current_index(&cache)?;
        let mut blocks = Vec::with_capacity(height as usize + 1);
        for index in 0..=height {
            if let Some(block) = ledger.get_block(&cache, &BlockRef::Index(index))? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    pub fn registry(&self) -> &NativeRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Thread-safe blockchain handle.
pub struct SharedBlockchain<S: Store> {
    inner: Mutex<Blockchain<S>>,
}

impl<S: Store> SharedBlockchain<S> {
    pub fn new(chain: Blockchain<S>) -> Self {
        Self {
            inner: Mutex::new(chain),
        }
    }

    // A panic inside the kernel happens before commit, so the guarded
    // state is still the last committed one.
    fn lock(&self) -> MutexGuard<'_, Blockchain<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn persist(
        &self,
        block: &Block,
        executor: &mut dyn TransactionExecutor,
    ) -> Result<PersistedBlock, BlockchainError> {
        self.lock().persist(block, executor)
    }

    pub fn height(&self) -> Result<u32, StorageError> {
        self.lock().height()
    }

    pub fn current_hash(&self) -> Result<UInt256, StorageError> {
        self.lock().current_hash()
    }

    /// Run `f` with the chain locked.
    pub fn with<R>(&self, f: impl FnOnce(&Blockchain<S>) -> R) -> R {
        f(&self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_kernel::settings::ProtocolSettingsOptions;
    use ledger_kernel::storage::MemoryStore;

    fn settings() -> ProtocolSettings {
        let options = ProtocolSettingsOptions {
            standby_committee: vec![
                format!("02{}", "11".repeat(32)),
                format!("03{}", "22".repeat(32)),
            ],
            validators_count: 2,
            ..ProtocolSettingsOptions::default()
        };
        ProtocolSettings::try_from(options).unwrap()
    }

    #[test]
    fn test_open_persists_genesis_once() {
        let chain = Blockchain::open(MemoryStore::new(), settings()).unwrap();
        assert_eq!(chain.height().unwrap(), 0);
        assert_eq!(chain.current_hash().unwrap(), genesis_block(chain.settings()).hash());

        let store = chain.store().clone();
        let reopened = Blockchain::open(store, settings()).unwrap();
        assert_eq!(reopened.height().unwrap(), 0);
        assert_eq!(reopened.export_blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_gap_without_panicking() {
        let mut chain = Blockchain::open(MemoryStore::new(), settings()).unwrap();
        let mut block = genesis_block(chain.settings());
        block.header.index = 2;
        block.header.prev_hash = chain.current_hash().unwrap();
        match chain.persist(&block, &mut HaltExecutor) {
            Err(BlockchainError::InvalidBlock(reason)) => assert!(reason.contains("block_sequence")),
            other => panic!("unexpected result: {:?}", other.map(|p| p.index)),
        }
        assert_eq!(chain.height().unwrap(), 0);
    }
}
