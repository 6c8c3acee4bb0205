//! Memory pool
//!
//! Holds verified transactions waiting for a block and owns the
//! admission context that accounts for their fees. Every mutation of the
//! context goes through this type, so pool membership and pooled fee
//! totals cannot drift apart.
//!
//! Priority order (highest first): high-priority attribute, network fee
//! per byte, absolute network fee, then lower hash.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ledger_kernel::admission::{Admission, AdmissionContext, AdmissionError};
use ledger_kernel::domain::{Block, Transaction, TransactionAttribute, UInt160, UInt256};
use ledger_kernel::error::StorageError;
use ledger_kernel::native::NativeRegistry;
use ledger_kernel::settings::ProtocolSettings;
use ledger_kernel::storage::DataCache;
use primitive_types::U256;
use tracing::{debug, info, trace};

/// Outcome of [`MemoryPool::try_add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Succeed,
    AlreadyInPool,
    /// Already persisted on chain.
    AlreadyExists,
    /// Conflicts with an on-chain or pooled transaction it cannot replace.
    HasConflicts,
    Expired,
    Invalid(&'static str),
    /// A signer is blocked by policy.
    PolicyFail,
    InsufficientFunds,
    DuplicateOracleResponse(u64),
    /// Pool is full and the transaction ranks below everything in it.
    OutOfMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Priority {
    high_priority: bool,
    fee_per_byte: u64,
    network_fee: u64,
    hash: Reverse<UInt256>,
}

impl Priority {
    fn of(tx: &Transaction, hash: UInt256) -> Self {
        let size = tx.size().max(1) as u64;
        Self {
            high_priority: tx.is_high_priority(),
            fee_per_byte: tx.network_fee / size,
            network_fee: tx.network_fee,
            hash: Reverse(hash),
        }
    }
}

#[derive(Debug, Clone)]
struct PoolItem {
    tx: Transaction,
    priority: Priority,
}

pub struct MemoryPool {
    capacity: usize,
    verified: BTreeMap<UInt256, PoolItem>,
    sorted: BTreeSet<Priority>,
    /// Declared conflict hash -> pooled transactions declaring it.
    conflicts: BTreeMap<UInt256, BTreeSet<UInt256>>,
    context: AdmissionContext,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            verified: BTreeMap::new(),
            sorted: BTreeSet::new(),
            conflicts: BTreeMap::new(),
            context: AdmissionContext::new(),
        }
    }

    pub fn with_settings(settings: &ProtocolSettings) -> Self {
        Self::new(settings.memory_pool_max_transactions)
    }

    pub fn len(&self) -> usize {
        self.verified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.verified.contains_key(hash)
    }

    pub fn get(&self, hash: &UInt256) -> Option<&Transaction> {
        self.verified.get(hash).map(|item| &item.tx)
    }

    /// Pooled fee total of `sender`.
    pub fn pooled_fee(&self, sender: &UInt160) -> U256 {
        self.context.total(sender)
    }

    /// Pooled transactions, highest priority first.
    pub fn sorted_transactions(&self) -> Vec<&Transaction> {
        self.sorted
            .iter()
            .rev()
            .filter_map(|p| self.verified.get(&p.hash.0))
            .map(|item| &item.tx)
            .collect()
    }

    /// Verify `tx` against `snapshot` and the current pool, then pool it.
    ///
    /// On anything but `Succeed` the pool is left untouched. On success,
    /// every transaction it replaces is evicted in the same step.
    pub fn try_add(
        &mut self,
        tx: Transaction,
        snapshot: &DataCache,
        registry: &NativeRegistry,
        settings: &ProtocolSettings,
    ) -> Result<VerifyResult, StorageError> {
        let hash = tx.hash();
        if self.verified.contains_key(&hash) {
            return Ok(VerifyResult::AlreadyInPool);
        }

        let result = self.verify_state_independent(&tx);
        if result != VerifyResult::Succeed {
            return Ok(result);
        }
        let result = self.verify_on_chain(&tx, &hash, snapshot, registry, settings)?;
        if result != VerifyResult::Succeed {
            return Ok(result);
        }

        let mut evicting = match self.pool_conflicts(&tx, &hash) {
            Ok(evicting) => evicting,
            Err(result) => return Ok(result),
        };

        let priority = Priority::of(&tx, hash);
        if self.verified.len() - evicting.len() >= self.capacity {
            let lowest = self
                .sorted
                .iter()
                .find(|p| !evicting.contains(&p.hash.0))
                .copied();
            match lowest {
                Some(lowest) if lowest < priority => {
                    evicting.insert(lowest.hash.0);
                }
                _ => return Ok(VerifyResult::OutOfMemory),
            }
        }

        let evicted: Vec<&Transaction> = evicting
            .iter()
            .filter_map(|h| self.verified.get(h))
            .map(|item| &item.tx)
            .collect();
        match self.context.check(&tx, evicted, snapshot, registry)? {
            Admission::Accepted => {}
            Admission::InsufficientFunds {
                sender,
                available,
                required,
            } => {
                debug!(tx = %hash, %sender, %available, %required, "rejected: insufficient funds");
                return Ok(VerifyResult::InsufficientFunds);
            }
            Admission::DuplicateOracleResponse(id) => {
                return Ok(VerifyResult::DuplicateOracleResponse(id));
            }
        }

        // Added before evicting so a rejection leaves the pool untouched.
        if let Err(AdmissionError::DuplicateOracleResponse { id, owner }) = self.context.add(&tx) {
            debug!(tx = %hash, id, %owner, "rejected: oracle response already pooled");
            return Ok(VerifyResult::DuplicateOracleResponse(id));
        }
        for victim in &evicting {
            self.remove(victim);
        }
        self.insert_item(hash, tx, priority);
        debug!(tx = %hash, evicted = evicting.len(), pooled = self.len(), "transaction pooled");
        Ok(VerifyResult::Succeed)
    }

    /// Checks that need nothing but the transaction itself.
    fn verify_state_independent(&self, tx: &Transaction) -> VerifyResult {
        if tx.signers.is_empty() {
            return VerifyResult::Invalid("transaction has no signers");
        }
        let unique: BTreeSet<UInt160> = tx.signer_accounts().collect();
        if unique.len() != tx.signers.len() {
            return VerifyResult::Invalid("duplicate signer");
        }
        let mut oracle_ids = 0;
        for attribute in &tx.attributes {
            match attribute {
                TransactionAttribute::OracleResponse { .. } => oracle_ids += 1,
                TransactionAttribute::Conflicts { hash } if *hash == tx.hash() => {
                    return VerifyResult::Invalid("transaction conflicts with itself");
                }
                _ => {}
            }
        }
        if oracle_ids > 1 {
            return VerifyResult::Invalid("more than one oracle response");
        }
        VerifyResult::Succeed
    }

    fn verify_on_chain(
        &self,
        tx: &Transaction,
        hash: &UInt256,
        snapshot: &DataCache,
        registry: &NativeRegistry,
        settings: &ProtocolSettings,
    ) -> Result<VerifyResult, StorageError> {
        let ledger = registry.ledger();
        if ledger.contains_transaction(snapshot, hash)? {
            return Ok(VerifyResult::AlreadyExists);
        }
        let signers: Vec<UInt160> = tx.signer_accounts().collect();
        if ledger.contains_conflict_hash(snapshot, hash, &signers, settings.max_traceable_blocks)? {
            return Ok(VerifyResult::HasConflicts);
        }
        for declared in tx.conflict_hashes() {
            if ledger.contains_transaction(snapshot, &declared)? {
                return Ok(VerifyResult::HasConflicts);
            }
        }

        let height = ledger.current_index(snapshot)?;
        let max_valid = height as u64 + settings.max_valid_until_block_increment as u64;
        if tx.valid_until_block <= height || tx.valid_until_block as u64 > max_valid {
            return Ok(VerifyResult::Expired);
        }
        for attribute in &tx.attributes {
            if let TransactionAttribute::NotValidBefore { height: start } = attribute {
                if height < *start {
                    return Ok(VerifyResult::Invalid("not valid before a later block"));
                }
            }
        }

        let policy = registry.policy();
        for signer in &signers {
            if policy.is_blocked(snapshot, signer)? {
                return Ok(VerifyResult::PolicyFail);
            }
        }

        let size = tx.size() as u64;
        let min_fee = size.saturating_mul(policy.get_fee_per_byte(snapshot)?);
        if tx.network_fee < min_fee {
            trace!(tx = %hash, network_fee = tx.network_fee, min_fee, "network fee below size fee");
            return Ok(VerifyResult::InsufficientFunds);
        }
        Ok(VerifyResult::Succeed)
    }

    /// Pooled transactions `tx` would replace. It may replace them only
    /// if it pays more network fee than all of them together and every
    /// one of their senders also signed `tx`.
    fn pool_conflicts(&self, tx: &Transaction, hash: &UInt256) -> Result<BTreeSet<UInt256>, VerifyResult> {
        let mut found: BTreeSet<UInt256> = tx
            .conflict_hashes()
            .filter(|declared| self.verified.contains_key(declared))
            .collect();
        if let Some(declaring) = self.conflicts.get(hash) {
            found.extend(declaring.iter().copied());
        }
        if found.is_empty() {
            return Ok(found);
        }

        let signers: BTreeSet<UInt160> = tx.signer_accounts().collect();
        let mut fee_sum: u64 = 0;
        for other in &found {
            let Some(item) = self.verified.get(other) else {
                continue;
            };
            if !signers.contains(&item.tx.sender()) {
                return Err(VerifyResult::HasConflicts);
            }
            fee_sum = fee_sum.saturating_add(item.tx.network_fee);
        }
        if fee_sum >= tx.network_fee {
            return Err(VerifyResult::HasConflicts);
        }
        Ok(found)
    }

    fn insert_item(&mut self, hash: UInt256, tx: Transaction, priority: Priority) {
        for declared in tx.conflict_hashes() {
            self.conflicts.entry(declared).or_default().insert(hash);
        }
        self.sorted.insert(priority);
        self.verified.insert(hash, PoolItem { tx, priority });
    }

    /// Drop a pooled transaction and release its fee.
    pub fn remove(&mut self, hash: &UInt256) -> Option<Transaction> {
        let item = self.verified.remove(hash)?;
        self.sorted.remove(&item.priority);
        for declared in item.tx.conflict_hashes() {
            if let Some(declaring) = self.conflicts.get_mut(&declared) {
                declaring.remove(hash);
                if declaring.is_empty() {
                    self.conflicts.remove(&declared);
                }
            }
        }
        self.context.remove(&item.tx);
        trace!(tx = %hash, "removed from pool");
        Some(item.tx)
    }

    /// Bring the pool in line with a newly persisted block: drop every
    /// transaction it included or validly conflicted with, then re-verify
    /// the rest against `snapshot`. Returns the hashes that left the pool.
    pub fn update_for_block(
        &mut self,
        block: &Block,
        snapshot: &DataCache,
        registry: &NativeRegistry,
        settings: &ProtocolSettings,
    ) -> Result<Vec<UInt256>, StorageError> {
        let mut dropped = Vec::new();
        for included in &block.transactions {
            let hash = included.hash();
            let mut gone: Vec<UInt256> = vec![hash];
            // A declared conflict only counts against a pooled transaction
            // whose sender co-signed the declaring one.
            let signers: BTreeSet<UInt160> = included.signer_accounts().collect();
            gone.extend(included.conflict_hashes().filter(|declared| {
                self.verified
                    .get(declared)
                    .is_some_and(|item| signers.contains(&item.tx.sender()))
            }));
            if let Some(declaring) = self.conflicts.get(&hash) {
                gone.extend(declaring.iter().copied());
            }
            for victim in gone {
                if self.remove(&victim).is_some() {
                    dropped.push(victim);
                }
            }
        }

        let mut survivors: Vec<(Priority, Transaction)> = std::mem::take(&mut self.verified)
            .into_values()
            .map(|item| (item.priority, item.tx))
            .collect();
        survivors.sort_by(|a, b| b.0.cmp(&a.0));
        self.sorted.clear();
        self.conflicts.clear();
        self.context = AdmissionContext::new();

        for (priority, tx) in survivors {
            let hash = priority.hash.0;
            let result = self.try_add(tx, snapshot, registry, settings)?;
            if result != VerifyResult::Succeed {
                debug!(tx = %hash, ?result, "dropped on re-verification");
                dropped.push(hash);
            }
        }
        info!(block = block.index(), dropped = dropped.len(), pooled = self.len(), "memory pool updated");
        Ok(dropped)
    }
}

/// Thread-safe pool handle. One lock covers verification and insertion,
/// so two transactions from the same sender can never both pass the
/// balance check against the same pooled total.
pub struct SharedMemoryPool {
    inner: Mutex<MemoryPool>,
}

impl SharedMemoryPool {
    pub fn new(pool: MemoryPool) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryPool> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_add(
        &self,
        tx: Transaction,
        snapshot: &DataCache,
        registry: &NativeRegistry,
        settings: &ProtocolSettings,
    ) -> Result<VerifyResult, StorageError> {
        self.lock().try_add(tx, snapshot, registry, settings)
    }

    pub fn update_for_block(
        &self,
        block: &Block,
        snapshot: &DataCache,
        registry: &NativeRegistry,
        settings: &ProtocolSettings,
    ) -> Result<Vec<UInt256>, StorageError> {
        self.lock().update_for_block(block, snapshot, registry, settings)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.lock().contains(hash)
    }

    pub fn pooled_fee(&self, sender: &UInt160) -> U256 {
        self.lock().pooled_fee(sender)
    }

    /// Up to `max` transactions in priority order, for block proposal.
    pub fn take_for_block(&self, max: usize) -> Vec<Transaction> {
        self.lock()
            .sorted_transactions()
            .into_iter()
            .take(max)
            .cloned()
            .collect()
    }
}
