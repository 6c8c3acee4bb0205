//! Committee module. Holds the committee set; validators for the next
//! block are drawn from it.

use crate::domain::{Hardfork, PublicKey, UInt160};
use crate::engine::ApplicationEngine;
use crate::error::{ContractError, StorageError};
use crate::hashing::{committee_address, native_address};
use crate::interop::{self, StackItem};
use crate::native::NativeModule;
use crate::proto_bridge::{decode_committee, encode_committee};
use crate::storage::{DataCache, ModuleId, StorageItem, StorageKey};

const PREFIX_COMMITTEE: u8 = 14;

pub struct CommitteeContract {
    id: ModuleId,
    address: UInt160,
}

impl CommitteeContract {
    pub const NAME: &'static str = "CommitteeContract";

    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            address: native_address(Self::NAME),
        }
    }

    fn key_committee(&self) -> StorageKey {
        StorageKey::new(self.id, PREFIX_COMMITTEE)
    }

    /// Committee members in configured order.
    pub fn get_committee(&self, snapshot: &DataCache) -> Result<Vec<PublicKey>, StorageError> {
        let key = self.key_committee();
        match snapshot.try_get(&key)? {
            Some(item) => decode_committee(&item.to_bytes()).map_err(|source| StorageError::Corrupted {
                key: key.to_string(),
                source,
            }),
            None => panic!(
                "Invariant violation: [INVARIANT:committee_missing] \
                 committee read before initialization"
            ),
        }
    }

    /// Multisig address of a simple committee majority.
    pub fn get_committee_address(&self, snapshot: &DataCache) -> Result<UInt160, StorageError> {
        Ok(committee_address(&self.get_committee(snapshot)?))
    }

    /// First `count` committee members, sorted.
    pub fn get_next_block_validators(
        &self,
        snapshot: &DataCache,
        count: usize,
    ) -> Result<Vec<PublicKey>, StorageError> {
        let mut validators = self.get_committee(snapshot)?;
        validators.truncate(count);
        validators.sort();
        Ok(validators)
    }
}

impl NativeModule for CommitteeContract {
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
        let committee = &engine.settings().standby_committee;
        engine
            .snapshot
            .add(&self.key_committee(), StorageItem::new(encode_committee(committee)))
    }

    fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        if !matches!(method, "getCommittee" | "getCommitteeAddress" | "getNextBlockValidators") {
            return Err(ContractError::MethodNotFound {
                module: Self::NAME,
                method: method.to_string(),
            });
        }
        interop::expect_args(args, 0)?;
        let keys_item = |keys: Vec<PublicKey>| {
            StackItem::Array(
                keys.iter()
                    .map(|k| StackItem::ByteString(k.as_bytes().to_vec()))
                    .collect(),
            )
        };
        match method {
            "getCommittee" => Ok(keys_item(self.get_committee(&engine.snapshot)?)),
            "getCommitteeAddress" => Ok(StackItem::from_hash160(
                &self.get_committee_address(&engine.snapshot)?,
            )),
            _ => {
                let count = engine.settings().validators_count;
                Ok(keys_item(self.get_next_block_validators(&engine.snapshot, count)?))
            }
        }
    }
}
