//! Policy module: network fee per byte and blocked accounts.
//! Setters require the committee's witness.

use tracing::info;

use crate::arithmetic::{amount_from_le_bytes, amount_to_le_bytes};
use crate::domain::{Hardfork, UInt160};
use crate::engine::ApplicationEngine;
use crate::error::{CodecError, ContractError, StorageError};
use crate::hashing::native_address;
use crate::interop::{self, StackItem};
use crate::native::NativeModule;
use crate::storage::{DataCache, ModuleId, StorageItem, StorageKey};

const PREFIX_FEE_PER_BYTE: u8 = 10;
const PREFIX_BLOCKED_ACCOUNT: u8 = 15;

pub const DEFAULT_FEE_PER_BYTE: u64 = 1000;
pub const MAX_FEE_PER_BYTE: u64 = 100_000_000;

pub struct PolicyContract {
    id: ModuleId,
    address: UInt160,
}

impl PolicyContract {
    pub const NAME: &'static str = "PolicyContract";

    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            address: native_address(Self::NAME),
        }
    }

    fn key_fee_per_byte(&self) -> StorageKey {
        StorageKey::new(self.id, PREFIX_FEE_PER_BYTE)
    }

    fn key_blocked(&self, account: &UInt160) -> StorageKey {
        StorageKey::new(self.id, PREFIX_BLOCKED_ACCOUNT).add_hash160(account)
    }

    pub fn get_fee_per_byte(&self, snapshot: &DataCache) -> Result<u64, StorageError> {
        let key = self.key_fee_per_byte();
        let Some(item) = snapshot.try_get(&key)? else {
            return Ok(DEFAULT_FEE_PER_BYTE);
        };
        let bytes = item.to_bytes();
        amount_from_le_bytes(&bytes)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| StorageError::Corrupted {
                key: key.to_string(),
                source: CodecError::InvalidLength {
                    field: "fee_per_byte",
                    expected: 8,
                    got: bytes.len(),
                },
            })
    }

    pub fn is_blocked(&self, snapshot: &DataCache, account: &UInt160) -> Result<bool, StorageError> {
        snapshot.contains(&self.key_blocked(account))
    }

    fn require_committee(&self, engine: &ApplicationEngine<'_>) -> Result<(), ContractError> {
        if !engine.registry().committee_has_witnessed(engine)? {
            return Err(ContractError::Unauthorized("committee witness required"));
        }
        Ok(())
    }

    pub fn set_fee_per_byte(
        &self,
        engine: &mut ApplicationEngine<'_>,
        value: i128,
    ) -> Result<(), ContractError> {
        if !(0..=MAX_FEE_PER_BYTE as i128).contains(&value) {
            return Err(ContractError::InvalidArgument(format!(
                "fee per byte {} outside 0..={}",
                value, MAX_FEE_PER_BYTE
            )));
        }
        self.require_committee(engine)?;
        let bytes = amount_to_le_bytes((value as u64).into());
        engine.snapshot.put(&self.key_fee_per_byte(), StorageItem::new(bytes))?;
        info!(fee_per_byte = value as u64, "fee per byte updated");
        Ok(())
    }

    /// `false` when the account is already blocked.
    pub fn block_account(
        &self,
        engine: &mut ApplicationEngine<'_>,
        account: &UInt160,
    ) -> Result<bool, ContractError> {
        self.require_committee(engine)?;
        if engine.registry().is_native(account) {
            return Err(ContractError::InvalidArgument(format!(
                "native module {} cannot be blocked",
                account
            )));
        }
        let key = self.key_blocked(account);
        if engine.snapshot.contains(&key)? {
            return Ok(false);
        }
        engine.snapshot.add(&key, StorageItem::new(Vec::new()))?;
        info!(%account, "account blocked");
        Ok(true)
    }

    /// `false` when the account was not blocked.
    pub fn unblock_account(
        &self,
        engine: &mut ApplicationEngine<'_>,
        account: &UInt160,
    ) -> Result<bool, ContractError> {
        self.require_committee(engine)?;
        let key = self.key_blocked(account);
        if !engine.snapshot.contains(&key)? {
            return Ok(false);
        }
        engine.snapshot.delete(&key)?;
        info!(%account, "account unblocked");
        Ok(true)
    }
}

impl NativeModule for PolicyContract {
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
        engine.snapshot.add(
            &self.key_fee_per_byte(),
            StorageItem::new(amount_to_le_bytes(DEFAULT_FEE_PER_BYTE.into())),
        )
    }

    fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        match method {
            "getFeePerByte" => {
                interop::expect_args(args, 0)?;
                Ok(StackItem::Integer(self.get_fee_per_byte(&engine.snapshot)? as i128))
            }
            "setFeePerByte" => {
                interop::expect_args(args, 1)?;
                let value = interop::integer_arg(args, 0, "value")?;
                self.set_fee_per_byte(engine, value)?;
                Ok(StackItem::Null)
            }
            "isBlocked" => {
                interop::expect_args(args, 1)?;
                let account = interop::hash160_arg(args, 0, "account")?;
                Ok(StackItem::Boolean(self.is_blocked(&engine.snapshot, &account)?))
            }
            "blockAccount" => {
                interop::expect_args(args, 1)?;
                let account = interop::hash160_arg(args, 0, "account")?;
                Ok(StackItem::Boolean(self.block_account(engine, &account)?))
            }
            "unblockAccount" => {
                interop::expect_args(args, 1)?;
                let account = interop::hash160_arg(args, 0, "account")?;
                Ok(StackItem::Boolean(self.unblock_account(engine, &account)?))
            }
            _ => Err(ContractError::MethodNotFound {
                module: Self::NAME,
                method: method.to_string(),
            }),
        }
    }
}
