//! Versioned key-value storage: keys, items, snapshots and the
//! write-tracking data cache used during block application.
//!
//! Key layout (bit-exact, part of the chain data format):
//!   [module id: i32 little-endian][prefix byte][key bytes]
//! Integers that must sort numerically are appended big-endian.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use primitive_types::U256;

use crate::domain::{Transaction, UInt160, UInt256, VmState};
use crate::error::{CodecError, StorageError};
use crate::proto_bridge;

/// Negative, registration-ordered namespace of a native module.
pub type ModuleId = i32;

/// Ordered set of writes produced by one block application.
/// `None` deletes the key.
pub type ChangeSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey {
    bytes: Vec<u8>,
}

impl StorageKey {
    pub fn new(id: ModuleId, prefix: u8) -> Self {
        Self {
            bytes: Self::prefix_bytes(id, prefix),
        }
    }

    /// Byte prefix shared by every key of `(id, prefix)`; used for scans.
    pub fn prefix_bytes(id: ModuleId, prefix: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + UInt256::LENGTH);
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.push(prefix);
        bytes
    }

    pub fn add(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn add_big_endian(self, value: u32) -> Self {
        self.add(&value.to_be_bytes())
    }

    pub fn add_hash160(self, hash: &UInt160) -> Self {
        self.add(hash.as_bytes())
    }

    pub fn add_hash256(self, hash: &UInt256) -> Self {
        self.add(hash.as_bytes())
    }

    pub fn module_id(&self) -> ModuleId {
        let mut id = [0u8; 4];
        id.copy_from_slice(&self.bytes[..4]);
        ModuleId::from_le_bytes(id)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module_id(), hex::encode(&self.bytes[4..]))
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self)
    }
}

// ---------------------------------------------------------------------------
// Interoperable states
// ---------------------------------------------------------------------------

/// Ledger record for a transaction hash.
///
/// A full record carries the transaction. A conflict stub carries only
/// the index of the block that declared the conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionState {
    pub block_index: u32,
    pub transaction: Option<Transaction>,
    pub vm_state: VmState,
}

impl TransactionState {
    pub fn stub(block_index: u32) -> Self {
        Self {
            block_index,
            transaction: None,
            vm_state: VmState::None,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.transaction.is_none()
    }
}

/// Current chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashIndexState {
    pub hash: UInt256,
    pub index: u32,
}

/// Balance of a fungible-asset account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountState {
    pub balance: U256,
}

/// Tagged union over the value shapes a storage item can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageValue {
    Raw(Vec<u8>),
    HashIndex(HashIndexState),
    Transaction(TransactionState),
    Account(AccountState),
}

/// A structured value stored under a key, decoded on first typed access.
pub trait Interoperable: Sized + Clone {
    const SHAPE: &'static str;

    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
    fn encode(&self) -> Vec<u8>;
    fn wrap(self) -> StorageValue;
    fn peek(value: &StorageValue) -> Option<&Self>;
    fn peek_mut(value: &mut StorageValue) -> Option<&mut Self>;
}

macro_rules! impl_interoperable {
    ($ty:ty, $variant:ident, $shape:literal, $decode:path, $encode:path) => {
        impl Interoperable for $ty {
            const SHAPE: &'static str = $shape;

            fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                $decode(bytes)
            }

            fn encode(&self) -> Vec<u8> {
                $encode(self)
            }

            fn wrap(self) -> StorageValue {
                StorageValue::$variant(self)
            }

            fn peek(value: &StorageValue) -> Option<&Self> {
                match value {
                    StorageValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn peek_mut(value: &mut StorageValue) -> Option<&mut Self> {
                match value {
                    StorageValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_interoperable!(
    HashIndexState,
    HashIndex,
    "HashIndexState",
    proto_bridge::decode_hash_index_state,
    proto_bridge::encode_hash_index_state
);
impl_interoperable!(
    TransactionState,
    Transaction,
    "TransactionState",
    proto_bridge::decode_transaction_state,
    proto_bridge::encode_transaction_state
);
impl_interoperable!(
    AccountState,
    Account,
    "AccountState",
    proto_bridge::decode_account_state,
    proto_bridge::encode_account_state
);

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageItem {
    value: StorageValue,
}

impl StorageItem {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            value: StorageValue::Raw(bytes),
        }
    }

    pub fn from_interoperable<T: Interoperable>(value: T) -> Self {
        Self { value: value.wrap() }
    }

    /// Encoded form. Structured values are re-encoded on every call;
    /// the data cache calls this once per changed key.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.value {
            StorageValue::Raw(bytes) => bytes.clone(),
            StorageValue::HashIndex(v) => v.encode(),
            StorageValue::Transaction(v) => v.encode(),
            StorageValue::Account(v) => v.encode(),
        }
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.value = StorageValue::Raw(bytes);
    }

    pub fn value(&self) -> &StorageValue {
        &self.value
    }

    /// Decoded copy of the value.
    pub fn get_interoperable<T: Interoperable>(&self) -> Result<T, CodecError> {
        match &self.value {
            StorageValue::Raw(bytes) => T::decode(bytes),
            other => T::peek(other)
                .cloned()
                .ok_or(CodecError::UnexpectedShape(T::SHAPE)),
        }
    }

    /// Decodes in place and hands out the structured value for mutation.
    pub fn get_interoperable_mut<T: Interoperable>(&mut self) -> Result<&mut T, CodecError> {
        if let StorageValue::Raw(bytes) = &self.value {
            self.value = T::decode(bytes)?.wrap();
        }
        T::peek_mut(&mut self.value).ok_or(CodecError::UnexpectedShape(T::SHAPE))
    }
}

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

/// Point-in-time read view of the store.
pub trait ReadOnlyStore: Send + Sync {
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// Ordered key-value store with snapshot isolation and atomic commit.
pub trait Store: Send + Sync {
    /// A view that never observes later commits.
    fn snapshot(&self) -> Arc<dyn ReadOnlyStore>;

    /// Apply every write in `changes` or none of them.
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError>;
}

/// Copy-on-write in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.data.iter()
    }
}

fn scan_prefix(
    data: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    data.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[derive(Debug, Clone)]
struct MemorySnapshot {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl ReadOnlyStore for MemorySnapshot {
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).cloned())
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(scan_prefix(&self.data, prefix))
    }
}

impl ReadOnlyStore for MemoryStore {
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).cloned())
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(scan_prefix(&self.data, prefix))
    }
}

impl Store for MemoryStore {
    fn snapshot(&self) -> Arc<dyn ReadOnlyStore> {
        Arc::new(MemorySnapshot {
            data: Arc::clone(&self.data),
        })
    }

    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError> {
        // Outstanding snapshots keep the old map; this clones on first write.
        let data = Arc::make_mut(&mut self.data);
        for (key, value) in changes {
            match value {
                Some(v) => {
                    data.insert(key.clone(), v.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    Added,
    Changed,
    Deleted,
}

#[derive(Debug, Clone)]
struct Trackable {
    item: StorageItem,
    state: TrackState,
}

/// Write-tracking overlay over a snapshot.
///
/// Cloning is the checkpoint mechanism: keep a clone, and restore it to
/// discard everything written since.
#[derive(Clone)]
pub struct DataCache {
    base: Arc<dyn ReadOnlyStore>,
    entries: BTreeMap<Vec<u8>, Trackable>,
}

impl DataCache {
    pub fn new(base: Arc<dyn ReadOnlyStore>) -> Self {
        Self {
            base,
            entries: BTreeMap::new(),
        }
    }

    pub fn try_get(&self, key: &StorageKey) -> Result<Option<StorageItem>, StorageError> {
        match self.entries.get(key.as_bytes()) {
            Some(t) if t.state == TrackState::Deleted => Ok(None),
            Some(t) => Ok(Some(t.item.clone())),
            None => Ok(self.base.try_get(key.as_bytes())?.map(StorageItem::new)),
        }
    }

    /// Typed read. `Ok(None)` when the key is absent.
    pub fn get_interoperable<T: Interoperable>(
        &self,
        key: &StorageKey,
    ) -> Result<Option<T>, StorageError> {
        match self.try_get(key)? {
            Some(item) => item
                .get_interoperable::<T>()
                .map(Some)
                .map_err(|source| corrupted(key, source)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.try_get(key)?.is_some())
    }

    /// Insert a key that must not exist yet. A duplicate is fatal.
    pub fn add(&mut self, key: &StorageKey, item: StorageItem) -> Result<(), StorageError> {
        let bytes = key.as_bytes().to_vec();
        let state = match self.entries.get(&bytes) {
            Some(t) if t.state == TrackState::Deleted => TrackState::Changed,
            Some(_) => duplicate_key(key),
            None => {
                if self.base.try_get(&bytes)?.is_some() {
                    duplicate_key(key);
                }
                TrackState::Added
            }
        };
        self.entries.insert(bytes, Trackable { item, state });
        Ok(())
    }

    /// Mutable access to the item under `key`, created with `factory`
    /// when absent. The entry is marked changed either way.
    pub fn get_and_change(
        &mut self,
        key: &StorageKey,
        factory: impl FnOnce() -> StorageItem,
    ) -> Result<&mut StorageItem, StorageError> {
        match self.entries.entry(key.as_bytes().to_vec()) {
            Entry::Occupied(occupied) => {
                let t = occupied.into_mut();
                match t.state {
                    TrackState::Deleted => {
                        t.item = factory();
                        t.state = TrackState::Changed;
                    }
                    TrackState::Added | TrackState::Changed => {}
                }
                Ok(&mut t.item)
            }
            Entry::Vacant(vacant) => {
                let trackable = match self.base.try_get(vacant.key())? {
                    Some(v) => Trackable {
                        item: StorageItem::new(v),
                        state: TrackState::Changed,
                    },
                    None => Trackable {
                        item: factory(),
                        state: TrackState::Added,
                    },
                };
                Ok(&mut vacant.insert(trackable).item)
            }
        }
    }

    /// Typed variant of [`DataCache::get_and_change`].
    pub fn get_and_change_interoperable<T: Interoperable>(
        &mut self,
        key: &StorageKey,
        factory: impl FnOnce() -> T,
    ) -> Result<&mut T, StorageError> {
        let label = key.clone();
        let item = self.get_and_change(key, || StorageItem::from_interoperable(factory()))?;
        item.get_interoperable_mut::<T>()
            .map_err(|source| corrupted(&label, source))
    }

    /// Insert or overwrite.
    pub fn put(&mut self, key: &StorageKey, item: StorageItem) -> Result<(), StorageError> {
        let slot = self.get_and_change(key, || StorageItem::new(Vec::new()))?;
        *slot = item;
        Ok(())
    }

    pub fn delete(&mut self, key: &StorageKey) -> Result<(), StorageError> {
        let bytes = key.as_bytes().to_vec();
        match self.entries.get_mut(&bytes) {
            Some(t) if t.state == TrackState::Added => {
                self.entries.remove(&bytes);
            }
            Some(t) => t.state = TrackState::Deleted,
            None => {
                if let Some(v) = self.base.try_get(&bytes)? {
                    self.entries.insert(
                        bytes,
                        Trackable {
                            item: StorageItem::new(v),
                            state: TrackState::Deleted,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Prefix scan merging the snapshot with pending writes, in key order.
    pub fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, StorageItem)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, StorageItem> = self
            .base
            .find(prefix)?
            .into_iter()
            .map(|(k, v)| (k, StorageItem::new(v)))
            .collect();

        for (key, t) in self.entries.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match t.state {
                TrackState::Deleted => {
                    merged.remove(key);
                }
                _ => {
                    merged.insert(key.clone(), t.item.clone());
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Number of keys with pending writes.
    pub fn pending_writes(&self) -> usize {
        self.entries.len()
    }

    /// Consume the cache; every pending write is encoded exactly once.
    pub fn into_change_set(self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for (key, t) in self.entries {
            match t.state {
                TrackState::Added | TrackState::Changed => {
                    changes.insert(key, Some(t.item.to_bytes()));
                }
                TrackState::Deleted => {
                    changes.insert(key, None);
                }
            }
        }
        changes
    }
}

fn corrupted(key: &StorageKey, source: CodecError) -> StorageError {
    StorageError::Corrupted {
        key: key.to_string(),
        source,
    }
}

fn duplicate_key(key: &StorageKey) -> ! {
    panic!(
        "Invariant violation: [INVARIANT:duplicate_key] key {} already exists",
        key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(suffix: u8) -> StorageKey {
        StorageKey::new(-1, 5).add(&[suffix])
    }

    fn cache_over(store: &MemoryStore) -> DataCache {
        DataCache::new(store.snapshot())
    }

    #[test]
    fn test_key_layout_is_id_le_then_prefix() {
        let k = StorageKey::new(-2, 12).add_big_endian(258);
        assert_eq!(k.as_bytes(), &[0xfe, 0xff, 0xff, 0xff, 12, 0, 0, 1, 2]);
        assert_eq!(k.module_id(), -2);
    }

    #[test]
    fn test_big_endian_indexes_sort_numerically() {
        let a = StorageKey::new(-1, 9).add_big_endian(255);
        let b = StorageKey::new(-1, 9).add_big_endian(256);
        assert!(a.as_bytes() < b.as_bytes());
    }

    #[test]
    fn test_snapshot_does_not_observe_later_commit() {
        let mut store = MemoryStore::new();
        let snap = store.snapshot();
        let mut changes = ChangeSet::new();
        changes.insert(vec![1], Some(vec![9]));
        store.commit(&changes).unwrap();
        assert_eq!(snap.try_get(&[1]).unwrap(), None);
        assert_eq!(store.snapshot().try_get(&[1]).unwrap(), Some(vec![9]));
    }

    #[test]
    fn test_get_and_change_encodes_once_into_change_set() {
        let store = MemoryStore::new();
        let mut cache = cache_over(&store);
        {
            let state = cache
                .get_and_change_interoperable(&key(1), HashIndexState::default)
                .unwrap();
            state.index = 7;
        }
        {
            let state = cache
                .get_and_change_interoperable(&key(1), HashIndexState::default)
                .unwrap();
            state.index = 8;
        }
        let changes = cache.into_change_set();
        assert_eq!(changes.len(), 1);
        let bytes = changes.get(key(1).as_bytes()).unwrap().clone().unwrap();
        let decoded = HashIndexState::decode(&bytes).unwrap();
        assert_eq!(decoded.index, 8);
    }

    #[test]
    fn test_reads_do_not_produce_writes() {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.insert(key(1).as_bytes().to_vec(), Some(vec![1, 2, 3]));
        store.commit(&changes).unwrap();

        let cache = cache_over(&store);
        assert!(cache.contains(&key(1)).unwrap());
        assert_eq!(cache.try_get(&key(1)).unwrap(), Some(StorageItem::new(vec![1, 2, 3])));
        assert_eq!(cache.pending_writes(), 0);
        assert!(cache.into_change_set().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate_key")]
    fn test_add_existing_key_is_fatal() {
        let store = MemoryStore::new();
        let mut cache = cache_over(&store);
        cache.add(&key(1), StorageItem::new(vec![1])).unwrap();
        cache.add(&key(1), StorageItem::new(vec![2])).unwrap();
    }

    #[test]
    fn test_delete_then_find_hides_key() {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::new();
        changes.insert(key(1).as_bytes().to_vec(), Some(vec![1]));
        changes.insert(key(2).as_bytes().to_vec(), Some(vec![2]));
        store.commit(&changes).unwrap();

        let mut cache = cache_over(&store);
        cache.delete(&key(1)).unwrap();
        cache.add(&key(3), StorageItem::new(vec![3])).unwrap();
        let found = cache.find(&StorageKey::prefix_bytes(-1, 5)).unwrap();
        let keys: Vec<_> = found.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![key(2).as_bytes().to_vec(), key(3).as_bytes().to_vec()]);

        let changes = cache.into_change_set();
        assert_eq!(changes.get(key(1).as_bytes()), Some(&None));
    }

    #[test]
    fn test_typed_access_rejects_wrong_shape() {
        let mut item = StorageItem::from_interoperable(AccountState::default());
        assert_eq!(
            item.get_interoperable_mut::<HashIndexState>().unwrap_err(),
            CodecError::UnexpectedShape("HashIndexState")
        );
    }
}
