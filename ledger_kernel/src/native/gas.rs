//! GAS: the fee-bearing fungible asset.
//!
//! Fees are burned from each sender during OnPersist; the block's network
//! fees are minted to the primary validator during PostPersist. Net supply
//! change per block is minus the sum of system fees.

use primitive_types::U256;
use tracing::debug;

use crate::arithmetic::{amount_from_le_bytes, amount_to_le_bytes, checked_add, checked_sub};
use crate::domain::{Hardfork, UInt160};
use crate::engine::ApplicationEngine;
use crate::error::{CodecError, ContractError, StorageError};
use crate::hashing::{native_address, signature_address};
use crate::interop::{self, StackItem};
use crate::native::NativeModule;
use crate::storage::{AccountState, DataCache, ModuleId, StorageItem, StorageKey};

const PREFIX_TOTAL_SUPPLY: u8 = 11;
const PREFIX_ACCOUNT: u8 = 20;

pub struct GasToken {
    id: ModuleId,
    address: UInt160,
}

impl GasToken {
    pub const NAME: &'static str = "GasToken";
    pub const SYMBOL: &'static str = "GAS";
    pub const DECIMALS: u8 = 8;

    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            address: native_address(Self::NAME),
        }
    }

    fn key_total_supply(&self) -> StorageKey {
        StorageKey::new(self.id, PREFIX_TOTAL_SUPPLY)
    }

    fn key_account(&self, account: &UInt160) -> StorageKey {
        StorageKey::new(self.id, PREFIX_ACCOUNT).add_hash160(account)
    }

    pub fn total_supply(&self, snapshot: &DataCache) -> Result<U256, StorageError> {
        let key = self.key_total_supply();
        match snapshot.try_get(&key)? {
            None => Ok(U256::zero()),
            Some(item) => {
                let bytes = item.to_bytes();
                amount_from_le_bytes(&bytes).ok_or_else(|| StorageError::Corrupted {
                    key: key.to_string(),
                    source: CodecError::InvalidLength {
                        field: "total_supply",
                        expected: 32,
                        got: bytes.len(),
                    },
                })
            }
        }
    }

    pub fn balance_of(&self, snapshot: &DataCache, account: &UInt160) -> Result<U256, StorageError> {
        Ok(snapshot
            .get_interoperable::<AccountState>(&self.key_account(account))?
            .map(|state| state.balance)
            .unwrap_or_default())
    }

    fn set_total_supply(&self, snapshot: &mut DataCache, supply: U256) -> Result<(), StorageError> {
        snapshot.put(&self.key_total_supply(), StorageItem::new(amount_to_le_bytes(supply)))
    }

    /// Credit `amount` to `account`. Zero is a no-op.
    pub fn mint(
        &self,
        engine: &mut ApplicationEngine<'_>,
        account: &UInt160,
        amount: U256,
    ) -> Result<(), StorageError> {
        if amount.is_zero() {
            return Ok(());
        }
        let state = engine
            .snapshot
            .get_and_change_interoperable(&self.key_account(account), AccountState::default)?;
        state.balance = checked_add(state.balance, amount);
        let supply = checked_add(self.total_supply(&engine.snapshot)?, amount);
        self.set_total_supply(&mut engine.snapshot, supply)?;
        self.notify_transfer(engine, None, Some(account), amount);
        Ok(())
    }

    /// Debit `amount` from `account`. Zero is a no-op; burning more than
    /// the balance is fatal.
    pub fn burn(
        &self,
        engine: &mut ApplicationEngine<'_>,
        account: &UInt160,
        amount: U256,
    ) -> Result<(), StorageError> {
        if amount.is_zero() {
            return Ok(());
        }
        let key = self.key_account(account);
        let balance = self.balance_of(&engine.snapshot, account)?;
        if balance < amount {
            panic!(
                "Invariant violation: [INVARIANT:amount_underflow] \
                 burning {} from {} with balance {}",
                amount, account, balance
            );
        }
        let remaining = checked_sub(balance, amount);
        if remaining.is_zero() {
            engine.snapshot.delete(&key)?;
        } else {
            let state = engine
                .snapshot
                .get_and_change_interoperable(&key, AccountState::default)?;
            state.balance = remaining;
        }
        let supply = checked_sub(self.total_supply(&engine.snapshot)?, amount);
        self.set_total_supply(&mut engine.snapshot, supply)?;
        self.notify_transfer(engine, Some(account), None, amount);
        Ok(())
    }

    /// Move `amount` between accounts. `false` without a witness for
    /// `from` or when the balance is insufficient.
    pub fn transfer(
        &self,
        engine: &mut ApplicationEngine<'_>,
        from: &UInt160,
        to: &UInt160,
        amount: U256,
    ) -> Result<bool, StorageError> {
        if !engine.check_witness(from) {
            return Ok(false);
        }
        let balance = self.balance_of(&engine.snapshot, from)?;
        if balance < amount {
            return Ok(false);
        }
        if !amount.is_zero() && from != to {
            let from_key = self.key_account(from);
            let remaining = checked_sub(balance, amount);
            if remaining.is_zero() {
                engine.snapshot.delete(&from_key)?;
            } else {
                engine
                    .snapshot
                    .get_and_change_interoperable(&from_key, AccountState::default)?
                    .balance = remaining;
            }
            let to_state = engine
                .snapshot
                .get_and_change_interoperable(&self.key_account(to), AccountState::default)?;
            to_state.balance = checked_add(to_state.balance, amount);
        }
        self.notify_transfer(engine, Some(from), Some(to), amount);
        Ok(true)
    }

    fn notify_transfer(
        &self,
        engine: &mut ApplicationEngine<'_>,
        from: Option<&UInt160>,
        to: Option<&UInt160>,
        amount: U256,
    ) {
        let party = |a: Option<&UInt160>| a.map(StackItem::from_hash160).unwrap_or(StackItem::Null);
        let amount = match StackItem::from_amount(amount) {
            Ok(item) => item,
            Err(_) => panic!(
                "Invariant violation: [INVARIANT:amount_range] \
                 transfer amount {} exceeds the integer range",
                amount
            ),
        };
        engine.notify(self.address, "Transfer", vec![party(from), party(to), amount]);
    }
}

impl NativeModule for GasToken {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn address(&self) -> UInt160 {
        self.address
    }

    fn initialize(
        &self,
        engine: &mut ApplicationEngine<'_>,
        hardfork: Option<Hardfork>,
    ) -> Result<(), StorageError> {
        if hardfork != self.active_in() {
            return Ok(());
        }
        let settings = engine.settings();
        let holder = settings.genesis_holder();
        debug!(%holder, amount = %settings.initial_gas_distribution, "minting genesis distribution");
        self.mint(engine, &holder, settings.initial_gas_distribution)
    }

    fn on_persist(&self, engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        let block = engine.block();
        for tx in &block.transactions {
            self.burn(engine, &tx.sender(), tx.fee())?;
        }
        debug!(
            index = block.index(),
            network_fees = %block.total_network_fee(),
            "burned transaction fees"
        );
        Ok(())
    }

    fn post_persist(&self, engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        let block = engine.block();
        let count = engine.settings().validators_count;
        let validators = engine
            .registry()
            .committee()
            .get_next_block_validators(&engine.snapshot, count)?;
        let primary = match validators.get(block.header.primary_index as usize) {
            Some(key) => signature_address(key),
            None => panic!(
                "Invariant violation: [INVARIANT:primary_index] \
                 primary index {} out of range for {} validators",
                block.header.primary_index,
                validators.len()
            ),
        };
        self.mint(engine, &primary, block.total_network_fee())
    }

    fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        match method {
            "symbol" => {
                interop::expect_args(args, 0)?;
                Ok(StackItem::ByteString(Self::SYMBOL.as_bytes().to_vec()))
            }
            "decimals" => {
                interop::expect_args(args, 0)?;
                Ok(StackItem::Integer(Self::DECIMALS as i128))
            }
            "totalSupply" => {
                interop::expect_args(args, 0)?;
                StackItem::from_amount(self.total_supply(&engine.snapshot)?)
            }
            "balanceOf" => {
                interop::expect_args(args, 1)?;
                let account = interop::hash160_arg(args, 0, "account")?;
                StackItem::from_amount(self.balance_of(&engine.snapshot, &account)?)
            }
            "transfer" => {
                interop::expect_args(args, 3)?;
                let from = interop::hash160_arg(args, 0, "from")?;
                let to = interop::hash160_arg(args, 1, "to")?;
                let amount = interop::amount_arg(args, 2, "amount")?;
                Ok(StackItem::Boolean(self.transfer(engine, &from, &to, amount)?))
            }
            _ => Err(ContractError::MethodNotFound {
                module: Self::NAME,
                method: method.to_string(),
            }),
        }
    }
}
