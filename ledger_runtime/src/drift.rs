//! Drift detection: determinism verification and state comparison.

use std::collections::BTreeMap;
use std::sync::Arc;

use ledger_kernel::domain::Block;
use ledger_kernel::error::StorageError;
use ledger_kernel::native::NativeRegistry;
use ledger_kernel::settings::ProtocolSettings;
use ledger_kernel::storage::{DataCache, ModuleId, ReadOnlyStore};
use tracing::error;

use crate::blockchain::BlockchainError;
use crate::replay;

/// Replay `blocks` twice from scratch and panic if the state hashes differ.
pub fn verify_determinism(settings: &ProtocolSettings, blocks: &[Block]) -> Result<String, BlockchainError> {
    let hash1 = replay::rebuild_hash(settings, blocks)?;
    let hash2 = replay::rebuild_hash(settings, blocks)?;

    if hash1 != hash2 {
        error!(%hash1, %hash2, "replays diverged");
        panic!(
            "DETERMINISM FAILURE: two replays produced different hashes.\n\
             Run 1: {}\n\
             Run 2: {}",
            hash1, hash2
        );
    }
    Ok(hash1)
}

/// Key-level comparison of two store views. Keys are rendered as
/// `module_id:hex(rest)`.
pub fn compare_states(
    registry: &NativeRegistry,
    state_a: Arc<dyn ReadOnlyStore>,
    state_b: Arc<dyn ReadOnlyStore>,
) -> Result<DriftReport, StorageError> {
    let map_a: BTreeMap<Vec<u8>, Vec<u8>> = state_a.find(&[])?.into_iter().collect();
    let map_b: BTreeMap<Vec<u8>, Vec<u8>> = state_b.find(&[])?.into_iter().collect();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut changed = Vec::new();
    let mut module_deltas: BTreeMap<ModuleId, i64> = BTreeMap::new();

    for (key, value) in &map_b {
        match map_a.get(key) {
            None => {
                added.push(render_key(key));
                *module_deltas.entry(module_of(key)).or_default() += 1;
            }
            Some(old) if old != value => changed.push(render_key(key)),
            Some(_) => {}
        }
    }
    for key in map_a.keys() {
        if !map_b.contains_key(key) {
            removed.push(render_key(key));
            *module_deltas.entry(module_of(key)).or_default() -= 1;
        }
    }
    module_deltas.retain(|_, delta| *delta != 0);

    let ledger = registry.ledger();
    let height_a = ledger.current_index(&DataCache::new(state_a))?;
    let height_b = ledger.current_index(&DataCache::new(state_b))?;

    Ok(DriftReport {
        key_count_a: map_a.len() as i64,
        key_count_b: map_b.len() as i64,
        key_count_delta: map_b.len() as i64 - map_a.len() as i64,
        height_a,
        height_b,
        module_key_deltas: module_deltas,
        added_keys: added,
        removed_keys: removed,
        changed_keys: changed,
    })
}

fn module_of(key: &[u8]) -> ModuleId {
    let mut id = [0u8; 4];
    let n = key.len().min(4);
    id[..n].copy_from_slice(&key[..n]);
    ModuleId::from_le_bytes(id)
}

fn render_key(key: &[u8]) -> String {
    if key.len() < 4 {
        return hex::encode(key);
    }
    format!("{}:{}", module_of(key), hex::encode(&key[4..]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub key_count_a: i64,
    pub key_count_b: i64,
    pub key_count_delta: i64,
    pub height_a: u32,
    pub height_b: u32,
    /// Net key count change per module, zero entries omitted.
    pub module_key_deltas: BTreeMap<ModuleId, i64>,
    pub added_keys: Vec<String>,
    pub removed_keys: Vec<String>,
    pub changed_keys: Vec<String>,
}

impl DriftReport {
    pub fn is_identical(&self) -> bool {
        self.added_keys.is_empty() && self.removed_keys.is_empty() && self.changed_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_kernel::storage::{MemoryStore, Store};

    #[test]
    fn test_reports_added_removed_and_changed() {
        let mut a = MemoryStore::new();
        let mut b = MemoryStore::new();
        let key = |id: i32, rest: &[u8]| {
            let mut k = id.to_le_bytes().to_vec();
            k.extend_from_slice(rest);
            k
        };
        a.commit(&[(key(-3, b"x"), Some(b"1".to_vec())), (key(-4, b"y"), Some(b"1".to_vec()))].into())
            .unwrap();
        b.commit(&[(key(-3, b"x"), Some(b"2".to_vec())), (key(-1, b"z"), Some(b"1".to_vec()))].into())
            .unwrap();

        let report = compare_states(&NativeRegistry::new(), a.snapshot(), b.snapshot()).unwrap();
        assert!(!report.is_identical());
        assert_eq!(report.added_keys, vec![format!("-1:{}", hex::encode(b"z"))]);
        assert_eq!(report.removed_keys, vec![format!("-4:{}", hex::encode(b"y"))]);
        assert_eq!(report.changed_keys, vec![format!("-3:{}", hex::encode(b"x"))]);
        assert_eq!(report.module_key_deltas, BTreeMap::from([(-4, -1), (-1, 1)]));
        assert_eq!(report.key_count_delta, 0);
    }
}
