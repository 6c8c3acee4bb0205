/// Lifecycle Engine
///
/// Applies one block to a snapshot and returns the resulting changeset.
/// The caller commits it.
///
/// Strict order per block:
///   1. Validate the block against the chain tip (fatal on failure)
///   2. Initialize modules whose activation matches this height
///   3. OnPersist on every module, in registration order
///   4. Per transaction: checkpoint, execute, discard writes unless Halt,
///      record the terminal VM state
///   5. PostPersist on every module, in registration order

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{Block, Hardfork, Transaction, UInt160, UInt256, VmState};
use crate::error::{ContractError, StorageError};
use crate::interop::StackItem;
use crate::invariants::validate_block;
use crate::native::NativeRegistry;
use crate::settings::ProtocolSettings;
use crate::storage::{ChangeSet, DataCache, ReadOnlyStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    OnPersist,
    PostPersist,
    Application,
    Verification,
}

/// Event raised by a module during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub contract: UInt160,
    pub event: &'static str,
    pub state: Vec<StackItem>,
}

/// Execution context threaded through every module call.
pub struct ApplicationEngine<'a> {
    pub trigger: TriggerType,
    pub snapshot: DataCache,
    pub persisting_block: Option<&'a Block>,
    pub container: Option<&'a Transaction>,
    settings: &'a ProtocolSettings,
    registry: &'a NativeRegistry,
    notifications: Vec<Notification>,
}

impl<'a> ApplicationEngine<'a> {
    pub fn new(
        trigger: TriggerType,
        snapshot: DataCache,
        settings: &'a ProtocolSettings,
        registry: &'a NativeRegistry,
    ) -> Self {
        Self {
            trigger,
            snapshot,
            persisting_block: None,
            container: None,
            settings,
            registry,
            notifications: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: &'a Block) -> Self {
        self.persisting_block = Some(block);
        self
    }

    pub fn with_container(mut self, tx: &'a Transaction) -> Self {
        self.container = Some(tx);
        self
    }

    pub fn settings(&self) -> &'a ProtocolSettings {
        self.settings
    }

    pub fn registry(&self) -> &'a NativeRegistry {
        self.registry
    }

    /// Block being persisted. Lifecycle hooks are only ever run with one.
    pub fn block(&self) -> &'a Block {
        match self.persisting_block {
            Some(block) => block,
            None => panic!(
                "Invariant violation: [INVARIANT:no_persisting_block] \
                 lifecycle hook invoked outside block application"
            ),
        }
    }

    /// True when `account` signed the script container.
    pub fn check_witness(&self, account: &UInt160) -> bool {
        self.container
            .map(|tx| tx.signer_accounts().any(|a| a == *account))
            .unwrap_or(false)
    }

    pub fn notify(&mut self, contract: UInt160, event: &'static str, state: Vec<StackItem>) {
        self.notifications.push(Notification {
            contract,
            event,
            state,
        });
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Call a native module method by address.
    pub fn call_native(
        &mut self,
        address: &UInt160,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        let registry = self.registry;
        registry.invoke(self, address, method, args)
    }

    pub fn into_snapshot(self) -> DataCache {
        self.snapshot
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

// ---------------------------------------------------------------------------
// Executor interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub vm_state: VmState,
    pub gas_consumed: u64,
    pub exception: Option<String>,
}

impl ExecutionOutcome {
    pub fn halt(gas_consumed: u64) -> Self {
        Self {
            vm_state: VmState::Halt,
            gas_consumed,
            exception: None,
        }
    }

    pub fn fault(exception: impl Into<String>) -> Self {
        Self {
            vm_state: VmState::Fault,
            gas_consumed: 0,
            exception: Some(exception.into()),
        }
    }
}

/// Opaque script runner. May call native modules through the engine.
pub trait TransactionExecutor {
    fn execute(&mut self, engine: &mut ApplicationEngine<'_>, tx: &Transaction) -> ExecutionOutcome;
}

/// Halts every script without consuming gas.
#[derive(Debug, Default, Clone, Copy)]
pub struct HaltExecutor;

impl TransactionExecutor for HaltExecutor {
    fn execute(&mut self, _engine: &mut ApplicationEngine<'_>, _tx: &Transaction) -> ExecutionOutcome {
        ExecutionOutcome::halt(0)
    }
}

// ---------------------------------------------------------------------------
// Block application
// ---------------------------------------------------------------------------

/// Result of one trigger or one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationExecuted {
    pub trigger: TriggerType,
    pub transaction: Option<UInt256>,
    pub vm_state: VmState,
    pub gas_consumed: u64,
    pub exception: Option<String>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone)]
pub struct PersistedBlock {
    pub index: u32,
    pub hash: UInt256,
    pub change_set: ChangeSet,
    pub executed: Vec<ApplicationExecuted>,
}

/// Apply `block` on top of `snapshot`.
///
/// Panics on invariant violations. Storage failures abort the block and
/// are returned; nothing is committed either way.
pub fn persist_block(
    snapshot: Arc<dyn ReadOnlyStore>,
    registry: &NativeRegistry,
    settings: &ProtocolSettings,
    block: &Block,
    executor: &mut dyn TransactionExecutor,
) -> Result<PersistedBlock, StorageError> {
    let cache = DataCache::new(snapshot);
    let ledger = registry.ledger();

    let tip = ledger.current_tip(&cache)?;
    validate_block(block, tip.as_ref(), settings.validators_count);

    let mut engine =
        ApplicationEngine::new(TriggerType::OnPersist, cache, settings, registry).with_block(block);
    let mut executed = Vec::with_capacity(block.transactions.len() + 2);

    // -- Initialize --
    let mut activating: Vec<Option<Hardfork>> = Vec::new();
    if !ledger.initialized(&engine.snapshot)? {
        activating.push(None);
    }
    activating.extend(settings.hardforks_activating_at(block.index()).into_iter().map(Some));
    for hardfork in activating {
        for module in registry.modules() {
            if module.active_in() == hardfork {
                debug!(module = module.name(), ?hardfork, "initializing native module");
                module.initialize(&mut engine, hardfork)?;
            }
        }
    }

    // -- OnPersist --
    for module in registry.modules() {
        module.on_persist(&mut engine)?;
    }
    executed.push(ApplicationExecuted {
        trigger: TriggerType::OnPersist,
        transaction: None,
        vm_state: VmState::Halt,
        gas_consumed: 0,
        exception: None,
        notifications: engine.take_notifications(),
    });

    // -- Transactions --
    engine.trigger = TriggerType::Application;
    for tx in &block.transactions {
        let hash = tx.hash();
        let checkpoint = engine.snapshot.clone();
        engine.container = Some(tx);
        let outcome = executor.execute(&mut engine, tx);
        engine.container = None;

        let mut notifications = engine.take_notifications();
        if outcome.vm_state != VmState::Halt {
            warn!(
                block = block.index(),
                tx = %hash,
                state = ?outcome.vm_state,
                exception = outcome.exception.as_deref().unwrap_or(""),
                "transaction did not halt, discarding its writes"
            );
            engine.snapshot = checkpoint;
            notifications.clear();
        }
        ledger.set_transaction_vm_state(&mut engine.snapshot, &hash, outcome.vm_state)?;

        executed.push(ApplicationExecuted {
            trigger: TriggerType::Application,
            transaction: Some(hash),
            vm_state: outcome.vm_state,
            gas_consumed: outcome.gas_consumed,
            exception: outcome.exception,
            notifications,
        });
    }

    // -- PostPersist --
    engine.trigger = TriggerType::PostPersist;
    for module in registry.modules() {
        module.post_persist(&mut engine)?;
    }
    executed.push(ApplicationExecuted {
        trigger: TriggerType::PostPersist,
        transaction: None,
        vm_state: VmState::Halt,
        gas_consumed: 0,
        exception: None,
        notifications: engine.take_notifications(),
    });

    let change_set = engine.into_snapshot().into_change_set();
    let hash = block.hash();
    info!(
        index = block.index(),
        hash = %hash,
        transactions = block.transactions.len(),
        writes = change_set.len(),
        "block applied"
    );

    Ok(PersistedBlock {
        index: block.index(),
        hash,
        change_set,
        executed,
    })
}
