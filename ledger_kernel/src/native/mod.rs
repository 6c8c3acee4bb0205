//! Native module registry.
//!
//! Modules are constructed once, in a fixed order, and receive strictly
//! decreasing ids starting at -1. The id is the storage namespace of the
//! module; the address is derived from its name.
//!
//! Order: Ledger (-1), Committee (-2), Gas (-3), Policy (-4).

pub mod committee;
pub mod gas;
pub mod ledger;
pub mod policy;

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{Hardfork, UInt160};
use crate::engine::ApplicationEngine;
use crate::error::{ContractError, StorageError};
use crate::hashing::native_address;
use crate::interop::StackItem;
use crate::storage::ModuleId;

pub use committee::CommitteeContract;
pub use gas::GasToken;
pub use ledger::LedgerContract;
pub use policy::PolicyContract;

/// Lifecycle and dispatch surface of a built-in module.
pub trait NativeModule: Send + Sync {
    fn name(&self) -> &'static str;
    fn id(&self) -> ModuleId;
    fn address(&self) -> UInt160;

    /// Hardfork at which the module becomes active; `None` for genesis.
    fn active_in(&self) -> Option<Hardfork> {
        None
    }

    fn initialize(
        &self,
        _engine: &mut ApplicationEngine<'_>,
        _hardfork: Option<Hardfork>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn on_persist(&self, _engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        Ok(())
    }

    fn post_persist(&self, _engine: &mut ApplicationEngine<'_>) -> Result<(), StorageError> {
        Ok(())
    }

    /// Contract-facing method call.
    fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError>;
}

/// Capabilities other components resolve modules by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Ledger,
    Committee,
    FeeAsset,
    Policy,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Ledger,
        Capability::Committee,
        Capability::FeeAsset,
        Capability::Policy,
    ];
}

/// A registered module.
pub enum NativeEntry {
    Ledger(LedgerContract),
    Committee(CommitteeContract),
    Gas(GasToken),
    Policy(PolicyContract),
}

impl NativeEntry {
    pub fn as_module(&self) -> &dyn NativeModule {
        match self {
            NativeEntry::Ledger(m) => m,
            NativeEntry::Committee(m) => m,
            NativeEntry::Gas(m) => m,
            NativeEntry::Policy(m) => m,
        }
    }

    fn capability(&self) -> Capability {
        match self {
            NativeEntry::Ledger(_) => Capability::Ledger,
            NativeEntry::Committee(_) => Capability::Committee,
            NativeEntry::Gas(_) => Capability::FeeAsset,
            NativeEntry::Policy(_) => Capability::Policy,
        }
    }
}

/// Typed view of an entry, used by [`NativeRegistry::lookup_by_capability`].
pub trait FromEntry: Sized {
    const CAPABILITY: Capability;

    fn from_entry(entry: &NativeEntry) -> Option<&Self>;
}

macro_rules! impl_from_entry {
    ($ty:ty, $variant:ident, $capability:expr) => {
        impl FromEntry for $ty {
            const CAPABILITY: Capability = $capability;

            fn from_entry(entry: &NativeEntry) -> Option<&Self> {
                match entry {
                    NativeEntry::$variant(m) => Some(m),
                    _ => None,
                }
            }
        }
    };
}

impl_from_entry!(LedgerContract, Ledger, Capability::Ledger);
impl_from_entry!(CommitteeContract, Committee, Capability::Committee);
impl_from_entry!(GasToken, Gas, Capability::FeeAsset);
impl_from_entry!(PolicyContract, Policy, Capability::Policy);

pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    by_address: BTreeMap<UInt160, usize>,
    capabilities: BTreeMap<Capability, usize>,
}

impl NativeRegistry {
    /// Build the registry with every built-in module.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
            by_address: BTreeMap::new(),
            capabilities: BTreeMap::new(),
        };

        registry.register(native_address(LedgerContract::NAME), |id| {
            NativeEntry::Ledger(LedgerContract::new(id))
        });
        registry.register(native_address(CommitteeContract::NAME), |id| {
            NativeEntry::Committee(CommitteeContract::new(id))
        });
        registry.register(native_address(GasToken::NAME), |id| {
            NativeEntry::Gas(GasToken::new(id))
        });
        registry.register(native_address(PolicyContract::NAME), |id| {
            NativeEntry::Policy(PolicyContract::new(id))
        });

        registry.build_capabilities();
        registry
    }

    /// Append a module. Ids are assigned -1, -2, ... in call order.
    /// Registering an address twice is fatal.
    pub fn register(
        &mut self,
        address: UInt160,
        build: impl FnOnce(ModuleId) -> NativeEntry,
    ) -> ModuleId {
        if self.by_address.contains_key(&address) {
            panic!(
                "Invariant violation: [INVARIANT:duplicate_module_address] \
                 module address {} is already registered",
                address
            );
        }
        let id = -(self.entries.len() as ModuleId) - 1;
        let entry = build(id);
        let module = entry.as_module();
        if module.id() != id || module.address() != address {
            panic!(
                "Invariant violation: [INVARIANT:module_identity] \
                 module {} built with id {} / {} but registered as {} / {}",
                module.name(),
                module.id(),
                module.address(),
                id,
                address
            );
        }
        debug!(module = module.name(), id, %address, "registered native module");
        self.by_address.insert(address, self.entries.len());
        self.entries.push(entry);
        id
    }

    fn build_capabilities(&mut self) {
        for capability in Capability::ALL {
            let providers: Vec<usize> = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.capability() == capability)
                .map(|(i, _)| i)
                .collect();
            match providers.as_slice() {
                [single] => {
                    self.capabilities.insert(capability, *single);
                }
                [] => panic!(
                    "Invariant violation: [INVARIANT:capability] \
                     no module provides {:?}",
                    capability
                ),
                _ => panic!(
                    "Invariant violation: [INVARIANT:capability] \
                     {} modules provide {:?}",
                    providers.len(),
                    capability
                ),
            }
        }
    }

    pub fn dispatch(&self, address: &UInt160) -> Option<&dyn NativeModule> {
        self.by_address
            .get(address)
            .map(|i| self.entries[*i].as_module())
    }

    pub fn is_native(&self, address: &UInt160) -> bool {
        self.by_address.contains_key(address)
    }

    /// Modules in registration order.
    pub fn modules(&self) -> impl Iterator<Item = &dyn NativeModule> {
        self.entries.iter().map(NativeEntry::as_module)
    }

    /// The unique module providing `T`'s capability.
    pub fn lookup_by_capability<T: FromEntry>(&self) -> &T {
        self.capabilities
            .get(&T::CAPABILITY)
            .and_then(|i| T::from_entry(&self.entries[*i]))
            .unwrap_or_else(|| {
                panic!(
                    "Invariant violation: [INVARIANT:capability] \
                     no module registered for {:?}",
                    T::CAPABILITY
                )
            })
    }

    pub fn ledger(&self) -> &LedgerContract {
        self.lookup_by_capability()
    }

    pub fn committee(&self) -> &CommitteeContract {
        self.lookup_by_capability()
    }

    pub fn gas(&self) -> &GasToken {
        self.lookup_by_capability()
    }

    pub fn policy(&self) -> &PolicyContract {
        self.lookup_by_capability()
    }

    /// True when the committee multisig address signed the engine's container.
    pub fn committee_has_witnessed(
        &self,
        engine: &ApplicationEngine<'_>,
    ) -> Result<bool, StorageError> {
        let address = self.committee().get_committee_address(&engine.snapshot)?;
        Ok(engine.check_witness(&address))
    }

    /// Route a contract call to the module at `address`.
    pub fn invoke(
        &self,
        engine: &mut ApplicationEngine<'_>,
        address: &UInt160,
        method: &str,
        args: &[StackItem],
    ) -> Result<StackItem, ContractError> {
        let module = self
            .dispatch(address)
            .ok_or(ContractError::NotNative(*address))?;
        module.invoke(engine, method, args)
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
