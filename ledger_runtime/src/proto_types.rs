//! Frame format of the append-only store.

use prost::Message;

/// One key write. `deleted` wins over `value`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoChangeEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub deleted: bool,
}

/// Every write of one committed block, in key order.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoChangeSet {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<ProtoChangeEntry>,
}

impl ProtoChangeSet {
    pub fn from_change_set(sequence: u64, changes: &ledger_kernel::storage::ChangeSet) -> Self {
        Self {
            sequence,
            entries: changes
                .iter()
                .map(|(key, value)| ProtoChangeEntry {
                    key: key.clone(),
                    value: value.clone().unwrap_or_default(),
                    deleted: value.is_none(),
                })
                .collect(),
        }
    }

    pub fn into_change_set(self) -> ledger_kernel::storage::ChangeSet {
        self.entries
            .into_iter()
            .map(|e| {
                let value = if e.deleted { None } else { Some(e.value) };
                (e.key, value)
            })
            .collect()
    }
}
