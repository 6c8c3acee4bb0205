//! Shared fixtures: generated committees, transaction and block builders,
//! and a chain harness over `MemoryStore`.

#![allow(dead_code)]

use ledger_kernel::domain::{Block, Header, PublicKey, Signer, Transaction, TransactionAttribute, UInt160, UInt256};
use ledger_kernel::engine::{
    persist_block, ApplicationEngine, ExecutionOutcome, HaltExecutor, PersistedBlock, TransactionExecutor,
    TriggerType,
};
use ledger_kernel::hashing::merkle_root;
use ledger_kernel::interop::StackItem;
use ledger_kernel::native::{NativeModule, NativeRegistry};
use ledger_kernel::settings::{ProtocolSettings, ProtocolSettingsOptions};
use ledger_kernel::storage::{DataCache, MemoryStore, Store};

pub fn public_key(seed: u8) -> PublicKey {
    let mut bytes = [seed; 33];
    bytes[0] = 0x02;
    PublicKey(bytes)
}

pub fn account(seed: u8) -> UInt160 {
    UInt160([seed; 20])
}

pub fn settings(committee: usize, validators: usize, max_traceable_blocks: u32) -> ProtocolSettings {
    let options = ProtocolSettingsOptions {
        standby_committee: (1..=committee as u8)
            .map(|seed| hex::encode(public_key(seed).0))
            .collect(),
        validators_count: validators,
        max_traceable_blocks,
        ..ProtocolSettingsOptions::default()
    };
    ProtocolSettings::try_from(options).unwrap()
}

pub fn default_settings() -> ProtocolSettings {
    settings(4, 4, 100)
}

pub fn tx(sender: UInt160, nonce: u32, system_fee: u64, network_fee: u64) -> Transaction {
    Transaction {
        version: 0,
        nonce,
        system_fee,
        network_fee,
        valid_until_block: 1_000,
        signers: vec![Signer::new(sender)],
        attributes: vec![],
        script: vec![],
    }
}

pub fn with_attribute(mut tx: Transaction, attribute: TransactionAttribute) -> Transaction {
    tx.attributes.push(attribute);
    tx
}

pub fn with_signer(mut tx: Transaction, signer: UInt160) -> Transaction {
    tx.signers.push(Signer::new(signer));
    tx
}

/// Script understood by [`ScriptedExecutor`]: move `amount` GAS from the
/// sender to `to`.
pub fn transfer_script(to: &UInt160, amount: u64) -> Vec<u8> {
    let mut script = b"transfer".to_vec();
    script.extend_from_slice(to.as_bytes());
    script.extend_from_slice(&amount.to_le_bytes());
    script
}

/// Same as [`transfer_script`] but the execution faults afterwards.
pub fn faulting_transfer_script(to: &UInt160, amount: u64) -> Vec<u8> {
    let mut script = transfer_script(to, amount);
    script.extend_from_slice(b"fault");
    script
}

/// Interprets the tiny script language above through native calls.
#[derive(Default)]
pub struct ScriptedExecutor;

impl TransactionExecutor for ScriptedExecutor {
    fn execute(&mut self, engine: &mut ApplicationEngine<'_>, tx: &Transaction) -> ExecutionOutcome {
        let script = tx.script.as_slice();
        let Some(body) = script.strip_prefix(b"transfer".as_slice()) else {
            return ExecutionOutcome::halt(0);
        };
        let to = UInt160::from_slice(&body[..20]).unwrap();
        let amount = u64::from_le_bytes(body[20..28].try_into().unwrap());
        let gas = engine.registry().gas().address();
        let args = [
            StackItem::from_hash160(&tx.sender()),
            StackItem::from_hash160(&to),
            StackItem::Integer(amount as i128),
        ];
        match engine.call_native(&gas, "transfer", &args) {
            Ok(StackItem::Boolean(true)) => {}
            Ok(other) => return ExecutionOutcome::fault(format!("transfer returned {:?}", other)),
            Err(e) => return ExecutionOutcome::fault(e.to_string()),
        }
        if body[28..].starts_with(b"fault") {
            return ExecutionOutcome::fault("scripted fault");
        }
        ExecutionOutcome::halt(1)
    }
}

pub struct Chain {
    pub store: MemoryStore,
    pub registry: NativeRegistry,
    pub settings: ProtocolSettings,
    pub tip: UInt256,
    pub height: u32,
}

impl Chain {
    /// A chain with its genesis block persisted.
    pub fn new(settings: ProtocolSettings) -> Self {
        let mut chain = Self {
            store: MemoryStore::new(),
            registry: NativeRegistry::new(),
            settings,
            tip: UInt256::ZERO,
            height: 0,
        };
        let genesis = chain.block_at(0, UInt256::ZERO, vec![]);
        chain.persist(&genesis);
        chain
    }

    pub fn cache(&self) -> DataCache {
        DataCache::new(self.store.snapshot())
    }

    pub fn holder(&self) -> UInt160 {
        self.settings.genesis_holder()
    }

    pub fn block_at(&self, index: u32, prev_hash: UInt256, transactions: Vec<Transaction>) -> Block {
        let hashes: Vec<_> = transactions.iter().map(Transaction::hash).collect();
        Block {
            header: Header {
                version: 0,
                prev_hash,
                merkle_root: merkle_root(&hashes),
                timestamp: 1_700_000_000_000 + index as u64,
                nonce: index as u64,
                index,
                primary_index: 0,
                next_consensus: self.holder(),
            },
            transactions,
        }
    }

    pub fn next_block(&self, transactions: Vec<Transaction>) -> Block {
        self.block_at(self.height + 1, self.tip, transactions)
    }

    pub fn persist(&mut self, block: &Block) -> PersistedBlock {
        self.persist_with(block, &mut HaltExecutor)
    }

    pub fn persist_with(&mut self, block: &Block, executor: &mut dyn TransactionExecutor) -> PersistedBlock {
        let persisted = persist_block(
            self.store.snapshot(),
            &self.registry,
            &self.settings,
            block,
            executor,
        )
        .unwrap();
        self.store.commit(&persisted.change_set).unwrap();
        self.tip = persisted.hash;
        self.height = persisted.index;
        persisted
    }

    /// Persist a block of `transactions` interpreted by [`ScriptedExecutor`].
    pub fn push(&mut self, transactions: Vec<Transaction>) -> PersistedBlock {
        let block = self.next_block(transactions);
        self.persist_with(&block, &mut ScriptedExecutor)
    }

    /// Give `to` exactly `amount` GAS from the genesis holder.
    pub fn fund(&mut self, to: &UInt160, amount: u64) {
        let holder = self.holder();
        let mut funding = tx(holder, 10_000 + self.height, 0, 0);
        funding.script = transfer_script(to, amount);
        self.push(vec![funding]);
    }

    /// Engine over the current state whose container is signed by `signers`.
    pub fn call<'a>(
        &'a self,
        container: &'a Transaction,
        address: &UInt160,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ledger_kernel::error::ContractError> {
        let mut engine = ApplicationEngine::new(
            TriggerType::Application,
            self.cache(),
            &self.settings,
            &self.registry,
        )
        .with_container(container);
        engine.call_native(address, method, args)
    }
}
