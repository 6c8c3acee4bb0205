/// Admission Context
///
/// Pool-scoped fee accounting. Tracks, per sender, the sum of
/// `system_fee + network_fee` over every pooled transaction, and which
/// pooled transaction owns each oracle response id.
///
/// A sender's pooled total plus a new transaction's fee may never exceed
/// the on-chain balance, after crediting the fees of transactions the new
/// one would evict. Owned by exactly one writer (the memory pool).

use std::collections::BTreeMap;

use primitive_types::U256;
use thiserror::Error;
use tracing::{debug, trace};

use crate::arithmetic::{checked_add, checked_sub};
use crate::domain::{Transaction, UInt160, UInt256};
use crate::error::StorageError;
use crate::native::NativeRegistry;
use crate::storage::DataCache;

/// Outcome of [`AdmissionContext::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// `available` is the balance plus fees freed by eviction.
    InsufficientFunds {
        sender: UInt160,
        available: U256,
        required: U256,
    },
    DuplicateOracleResponse(u64),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("oracle response {id} is already pooled by {owner}")]
    DuplicateOracleResponse { id: u64, owner: UInt256 },
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionContext {
    sender_fee: BTreeMap<UInt160, U256>,
    oracle_responses: BTreeMap<u64, UInt256>,
}

impl AdmissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate pooled fee of `sender`; zero when nothing is pooled.
    pub fn total(&self, sender: &UInt160) -> U256 {
        self.sender_fee.get(sender).copied().unwrap_or_default()
    }

    /// Decide whether `tx` may join the pool, as if every transaction in
    /// `evicting` had already been removed. Reads only the sender's balance.
    pub fn check<'t>(
        &self,
        tx: &Transaction,
        evicting: impl IntoIterator<Item = &'t Transaction>,
        snapshot: &DataCache,
        registry: &NativeRegistry,
    ) -> Result<Admission, StorageError> {
        let hash = tx.hash();
        if let Some(id) = tx.oracle_response_id() {
            if matches!(self.oracle_responses.get(&id), Some(owner) if *owner != hash) {
                return Ok(Admission::DuplicateOracleResponse(id));
            }
        }

        let sender = tx.sender();
        let balance = registry.gas().balance_of(snapshot, &sender)?;
        let freed = evicting
            .into_iter()
            .filter(|e| e.sender() == sender)
            .fold(U256::zero(), |acc, e| checked_add(acc, e.fee()));

        let required = checked_add(tx.fee(), self.total(&sender));
        let available = checked_add(balance, freed);
        if available < required {
            trace!(%sender, %balance, %freed, %required, "insufficient funds");
            return Ok(Admission::InsufficientFunds {
                sender,
                available,
                required,
            });
        }
        Ok(Admission::Accepted)
    }

    /// Account for a newly pooled transaction. A second owner for the
    /// same oracle response id is rejected before fees are touched.
    pub fn add(&mut self, tx: &Transaction) -> Result<(), AdmissionError> {
        let hash = tx.hash();
        if let Some(id) = tx.oracle_response_id() {
            if let Some(owner) = self.oracle_responses.get(&id) {
                return Err(AdmissionError::DuplicateOracleResponse { id, owner: *owner });
            }
            self.oracle_responses.insert(id, hash);
        }
        let sender = tx.sender();
        let fee = tx.fee();
        if !fee.is_zero() {
            let total = self.sender_fee.entry(sender).or_default();
            *total = checked_add(*total, fee);
        }
        debug!(%sender, tx = %hash, total = %self.total(&sender), "pooled fee added");
        Ok(())
    }

    /// Release a pooled transaction's fee. The sender must be known and
    /// hold at least that much; anything else is an accounting leak.
    pub fn remove(&mut self, tx: &Transaction) {
        let sender = tx.sender();
        let fee = tx.fee();
        match self.sender_fee.get_mut(&sender) {
            Some(total) => {
                *total = checked_sub(*total, fee);
                if total.is_zero() {
                    self.sender_fee.remove(&sender);
                }
            }
            // Zero-fee transactions never create an entry.
            None if fee.is_zero() => {}
            None => panic!(
                "Invariant violation: [INVARIANT:pool_accounting] \
                 removing {} for unknown sender {}",
                tx.hash(),
                sender
            ),
        }

        if let Some(id) = tx.oracle_response_id() {
            let hash = tx.hash();
            if self.oracle_responses.get(&id) == Some(&hash) {
                self.oracle_responses.remove(&id);
            }
        }
    }
}
