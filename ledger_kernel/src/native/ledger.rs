//! Ledger module: trimmed blocks, transaction records, conflict stubs and
//! the current-block pointer.
//!
//! Keys (under the module id):
//!   9  ++ index (big-endian u32)        -> block hash
//!   5  ++ block hash                    -> trimmed block
//!   11 ++ tx hash                       -> TransactionState (full or stub)
//!   11 ++ tx hash ++ signer             -> TransactionState (stub)
//!   12                                  -> HashIndexState (current block)
//!
//! Every lookup exposed to contracts is bounded by the traceability
//! window: `index <= current && index + max_traceable > current`.

use tracing::debug;

use crate::domain::{Block, Header, Transaction, TrimmedBlock, UInt160, UInt256, VmState};
use crate::engine::ApplicationEngine;
use crate::error::{CodecError, ContractError, StorageError};
use crate::hashing::native_address;
use crate::interop::{self, BlockRef, StackItem};
use crate::native::NativeModule;
use crate::proto_bridge::{decode_trimmed_block, encode_trimmed_block};
use crate::storage::{DataCache, HashIndexState, ModuleId, StorageItem, StorageKey, TransactionState};

const PREFIX_BLOCK_HASH: u8 = 9;
const PREFIX_CURRENT_BLOCK: u8 = 12;
const PREFIX_BLOCK: u8 = 5;
const PREFIX_TRANSACTION: u8 = 11;

pub struct LedgerContract {
    id: ModuleId,
    address: UInt160,
}

impl LedgerContract {
    pub const NAME: &'static str = "LedgerContract";

    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            address: native_address(Self::NAME),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_address(id: ModuleId, address: UInt160) -> Self {
        Self { id, address }
    }

    // -- keys --

    fn key_block_hash(&self, index: u32) -> StorageKey {
        StorageKey::new(self.id, PREFIX_BLOCK_HASH).add_big_endian(index)
    }

    fn key_current_block(&self) -> StorageKey {
        StorageKey::new(self.id, PREFIX_CURRENT_BLOCK)
    }

    fn key_block(&self, hash: &UInt256) -> StorageKey {
        StorageKey::new(self.id, PREFIX_BLOCK).add_hash256(hash)
    }

    fn key_transaction(&self, hash: &UInt256) -> StorageKey {
        StorageKey::new(self.id, PREFIX_TRANSACTION).add_hash256(hash)
    }

    fn key_conflict_signer(&self, hash: &UInt256, signer: &UInt160) -> StorageKey {
        self.key_transaction(hash).add_hash160(signer)
    }

    // -- chain tip --

    /// Current tip, `None` before the genesis block has been persisted.
    pub fn current_tip(&self, snapshot: &DataCache) -> Result<Option<HashIndexState>, StorageError> {
        snapshot.get_interoperable::<HashIndexState>(&self.key_current_block())
    }

    /// Hash of the tip, zero on an empty ledger.
    pub fn current_hash(&self, snapshot: &DataCache) -> Result<UInt256, StorageError> {
        Ok(self.current_tip(snapshot)?.unwrap_or_default().hash)
    }

    /// Index of the tip, zero on an empty ledger.
    pub fn current_index(&self, snapshot: &DataCache) -> Result<u32, StorageError> {
        Ok(self.current_tip(snapshot)?.unwrap_or_default().index)
    }

    /// True once any block has been stored.
    pub fn initialized(&self, snapshot: &DataCache) -> Result<bool, StorageError> {
        let prefix = StorageKey::prefix_bytes(self.id, PREFIX_BLOCK);
        Ok(!snapshot.find(&prefix)?.is_empty())
    }

    pub fn is_traceable_block(
        &self,
        snapshot: &DataCache,
        index: u32,
        max_traceable_blocks: u32,
    ) -> Result<bool, StorageError> {
        let current = self.current_index(snapshot)?;
        Ok(is_traceable(index, current, max_traceable_blocks))
    }

    // -- blocks --

    pub fn get_block_hash(&self, snapshot: &DataCache, index: u32) -> Result<Option<UInt256>, StorageError> {
        let key = self.key_block_hash(index);
        match snapshot.try_get(&key)? {
            None => Ok(None),
            Some(item) => {
                let bytes = item.to_bytes();
                UInt256::from_slice(&bytes).map(Some).ok_or_else(|| StorageError::Corrupted {
                    key: key.to_string(),
                    source: CodecError::InvalidLength {
                        field: "block_hash",
                        expected: UInt256::LENGTH,
                        got: bytes.len(),
                    },
                })
            }
        }
    }

    pub fn contains_block(&self, snapshot: &DataCache, hash: &UInt256) -> Result<bool, StorageError> {
        snapshot.contains(&self.key_block(hash))
    }

    pub fn get_trimmed_block(
        &self,
        snapshot: &DataCache,
        hash: &UInt256,
    ) -> Result<Option<TrimmedBlock>, StorageError> {
        let key = self.key_block(hash);
        match snapshot.try_get(&key)? {
            None => Ok(None),
            Some(item) => decode_trimmed_block(&item.to_bytes())
                .map(Some)
                .map_err(|source| StorageError::Corrupted {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    fn resolve(&self, snapshot: &DataCache, block: &BlockRef) -> Result<Option<UInt256>, StorageError> {
        match block {
            BlockRef::Index(index) => self.get_block_hash(snapshot, *index),
            BlockRef::Hash(hash) => Ok(Some(*hash)),
        }
    }

    /// Full block, transactions reassembled in trimmed-block order.
    pub fn get_block(&self, snapshot: &DataCache, block: &BlockRef) -> Result<Option<Block>, StorageError> {
        let Some(hash) = self.resolve(snapshot, block)? else {
            return Ok(None);
        };
        let Some(trimmed) = self.get_trimmed_block(snapshot, &hash)? else {
            return Ok(None);
        };
        let mut transactions = Vec::with_capacity(trimmed.hashes.len());
        for tx_hash in &trimmed.hashes {
            match self.get_transaction(snapshot, tx_hash)? {
                Some(tx) => transactions.push(tx),
                None => panic!(
                    "Invariant violation: [INVARIANT:missing_transaction] \
                     block {} lists {} but no record exists",
                    hash, tx_hash
                ),
            }
        }
        Ok(Some(Block {
            header: trimmed.header,
            transactions,
        }))
    }

    pub fn get_header(&self, snapshot: &DataCache, block: &BlockRef) -> Result<Option<Header>, StorageError> {
        let Some(hash) = self.resolve(snapshot, block)? else {
            return Ok(None);
        };
        Ok(self.get_trimmed_block(snapshot, &hash)?.map(|b| b.header))
    }

    // -- transactions --

    /// Full record for `hash`. Conflict stubs read as absent.
    pub fn get_transaction_state(
        &self,
        snapshot: &DataCache,
        hash: &UInt256,
    ) -> Result<Option<TransactionState>, StorageError> {
        Ok(snapshot
            .get_interoperable::<TransactionState>(&self.key_transaction(hash))?
            .filter(|state| !state.is_stub()))
    }

    pub fn get_transaction(&self, snapshot: &DataCache, hash: &UInt256) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .get_transaction_state(snapshot, hash)?
            .and_then(|state| state.transaction))
    }

    pub fn contains_transaction(&self, snapshot: &DataCache, hash: &UInt256) -> Result<bool, StorageError> {
        Ok(self.get_transaction_state(snapshot, hash)?.is_some())
    }

    /// True when an on-chain transaction, co-signed by one of `signers`,
    /// declared a conflict with `hash` inside the traceability window.
    pub fn contains_conflict_hash(
        &self,
        snapshot: &DataCache,
        hash: &UInt256,
        signers: &[UInt160],
        max_traceable_blocks: u32,
    ) -> Result<bool, StorageError> {
        let Some(stub) = snapshot.get_interoperable::<TransactionState>(&self.key_transaction(hash))? else {
            return Ok(false);
        };
        if !stub.is_stub() {
            return Ok(false);
        }
        let current = self.current_index(snapshot)?;
        if !is_traceable(stub.block_index, current, max_traceable_blocks) {
            return Ok(false);
        }
        for signer in signers {
            let key = self.key_conflict_signer(hash, signer);
            if let Some(state) = snapshot.get_interoperable::<TransactionState>(&key)? {
                if is_traceable(state.block_index, current, max_traceable_blocks) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Record the executor's terminal state for a transaction of the
    /// block being persisted.
    pub fn set_transaction_vm_state(
        &self,
        snapshot: &mut DataCache,
        hash: &UInt256,
        vm_state: VmState,
    ) -> Result<(), StorageError> {
        let key = self.key_transaction(hash);
        let state = snapshot.get_and_change_interoperable::<TransactionState>(&key, || {
            panic!(
                "Invariant violation: [INVARIANT:missing_transaction] \
                 no record for executed transaction {}",
                hash
            )
        })?;
        state.vm_state = vm_state;
        Ok(())
    }

    // -- contract methods --

    fn traceable_block(
        &self,
        engine: &ApplicationEngine<'_>,
        args: &[StackItem],
    ) -> Result<Option<TrimmedBlock>, ContractError> {
        let block_ref = interop::block_ref_arg(args, 0, "indexOrHash")?;
        let snapshot = &engine.snapshot;
        let Some(hash) = self.resolve(snapshot, &block_ref)? else {
            return Ok(None);
        };
        let Some(block) = self.get_trimmed_block(snapshot, &hash)? else {
            return Ok(None);
        };
        let max = engine.settings().max_traceable_blocks;
        if !self.is_traceable_block(snapshot, block.index(), max)? {
            return Ok(None);
        }
        Ok(Some(block))
    }

    fn traceable_transaction(
        &self,
        engine: &ApplicationEngine<'_>,
        hash: &UInt256,
    ) -> Result<Option<TransactionState>, ContractError> {
        let snapshot = &engine.snapshot;
        let Some(state) = self.get_transaction_state(snapshot, hash)? else {
            return Ok(None);
        };
        let max = engine.settings().max_traceable_blocks;
        if !self.is_traceable_block(snapshot, state.block_index, max)? {
            return Ok(None);
        }
        Ok(Some(state))
    }
}

fn is_traceable(index: u32, current: u32, max_traceable_blocks: u32) -> bool {
    index <= current && index as u64 + max_traceable_blocks as u64 > current as u64
}

impl NativeModule for LedgerContract {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn address(&self) -> UInt160 {
        self.address
    }

    fn on_persist(&self, engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        let block = engine.block();
        let index = block.index();
        if let Some(tip) = self.current_tip(&engine.snapshot)? {
            if Some(index) != tip.index.checked_add(1) {
                panic!(
                    "Invariant violation: [INVARIANT:block_sequence] \
                     ledger at {} cannot persist block {}",
                    tip.index, index
                );
            }
        }

        let hash = block.hash();
        let snapshot = &mut engine.snapshot;
        snapshot.add(&self.key_block_hash(index), StorageItem::new(hash.as_bytes().to_vec()))?;
        snapshot.add(&self.key_block(&hash), StorageItem::new(encode_trimmed_block(&block.trim())))?;

        for tx in &block.transactions {
            // A full record replaces any stub left by an earlier conflict.
            snapshot.put(
                &self.key_transaction(&tx.hash()),
                StorageItem::from_interoperable(TransactionState {
                    block_index: index,
                    transaction: Some(tx.clone()),
                    vm_state: VmState::None,
                }),
            )?;

            for conflict in tx.conflict_hashes() {
                let key = self.key_transaction(&conflict);
                let has_full_record = snapshot
                    .get_interoperable::<TransactionState>(&key)?
                    .map(|state| !state.is_stub())
                    .unwrap_or(false);
                if !has_full_record {
                    snapshot.put(&key, StorageItem::from_interoperable(TransactionState::stub(index)))?;
                }
                for signer in tx.signer_accounts() {
                    snapshot.put(
                        &self.key_conflict_signer(&conflict, &signer),
                        StorageItem::from_interoperable(TransactionState::stub(index)),
                    )?;
                }
            }
        }
        debug!(index, %hash, transactions = block.transactions.len(), "ledger stored block");
        Ok(())
    }

    fn post_persist(&self, engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        let block = engine.block();
        let state = engine
            .snapshot
            .get_and_change_interoperable(&self.key_current_block(), HashIndexState::default)?;
        state.hash = block.hash();
        state.index = block.index();
        Ok(())
    }

    fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        match method {
            "currentHash" => {
                interop::expect_args(args, 0)?;
                Ok(StackItem::from_hash256(&self.current_hash(&engine.snapshot)?))
            }
            "currentIndex" => {
                interop::expect_args(args, 0)?;
                Ok(StackItem::Integer(self.current_index(&engine.snapshot)? as i128))
            }
            "getBlock" => {
                interop::expect_args(args, 1)?;
                Ok(self
                    .traceable_block(engine, args)?
                    .map(|b| StackItem::from_trimmed_block(&b))
                    .unwrap_or(StackItem::Null))
            }
            "getTransaction" => {
                interop::expect_args(args, 1)?;
                let hash = interop::hash256_arg(args, 0, "hash")?;
                Ok(self
                    .traceable_transaction(engine, &hash)?
                    .and_then(|s| s.transaction)
                    .map(|tx| StackItem::from_transaction(&tx))
                    .unwrap_or(StackItem::Null))
            }
            "getTransactionSigners" => {
                interop::expect_args(args, 1)?;
                let hash = interop::hash256_arg(args, 0, "hash")?;
                Ok(self
                    .traceable_transaction(engine, &hash)?
                    .and_then(|s| s.transaction)
                    .map(|tx| StackItem::Array(tx.signers.iter().map(StackItem::from_signer).collect()))
                    .unwrap_or(StackItem::Null))
            }
            "getTransactionVMState" => {
                interop::expect_args(args, 1)?;
                let hash = interop::hash256_arg(args, 0, "hash")?;
                let vm_state = self
                    .traceable_transaction(engine, &hash)?
                    .map(|s| s.vm_state)
                    .unwrap_or(VmState::None);
                Ok(StackItem::Integer(vm_state as i128))
            }
            "getTransactionHeight" => {
                interop::expect_args(args, 1)?;
                let hash = interop::hash256_arg(args, 0, "hash")?;
                Ok(StackItem::Integer(
                    self.traceable_transaction(engine, &hash)?
                        .map(|s| s.block_index as i128)
                        .unwrap_or(-1),
                ))
            }
            "getTransactionFromBlock" => {
                interop::expect_args(args, 2)?;
                let tx_index = interop::integer_arg(args, 1, "txIndex")?;
                let Some(block) = self.traceable_block(engine, args)? else {
                    return Ok(StackItem::Null);
                };
                let hash = usize::try_from(tx_index)
                    .ok()
                    .and_then(|i| block.hashes.get(i))
                    .ok_or_else(|| {
                        ContractError::InvalidArgument(format!(
                            "txIndex {} out of range for {} transactions",
                            tx_index,
                            block.hashes.len()
                        ))
                    })?;
                Ok(self
                    .get_transaction(&engine.snapshot, hash)?
                    .map(|tx| StackItem::from_transaction(&tx))
                    .unwrap_or(StackItem::Null))
            }
            _ => Err(ContractError::MethodNotFound {
                module: Self::NAME,
                method: method.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceability_boundary() {
        // window 3, block 1: traceable at 3, not at 4.
        assert!(is_traceable(1, 3, 3));
        assert!(!is_traceable(1, 4, 3));
        assert!(!is_traceable(5, 4, 3));
        assert!(is_traceable(0, 0, 1));
    }

    #[test]
    fn test_traceability_does_not_overflow() {
        assert!(is_traceable(u32::MAX, u32::MAX, u32::MAX));
    }
}
