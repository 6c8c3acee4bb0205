/// Block Invariant Checks
///
/// Hard-fail validation of a block against the current chain tip.
/// Every check has a panicking form, used inside block application, and
/// a `try_` form returning the same message, used by callers that want
/// to reject a block before applying it.

use std::collections::BTreeSet;

use crate::domain::Block;
use crate::hashing::merkle_root;
use crate::storage::HashIndexState;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every block check. Panics on the first failure.
pub fn validate_block(block: &Block, tip: Option<&HashIndexState>, validators_count: usize) {
    if let Err(message) = try_validate_block(block, tip, validators_count) {
        panic!("{}", message);
    }
}

/// Non-panicking variant of `validate_block`.
pub fn try_validate_block(
    block: &Block,
    tip: Option<&HashIndexState>,
    validators_count: usize,
) -> Result<(), String> {
    try_check_linkage(block, tip)?;
    try_check_merkle_root(block)?;
    try_check_unique_transactions(block)?;
    try_check_primary_index(block, validators_count)?;
    Ok(())
}

/// Block `index` must extend the tip by exactly one. On an empty ledger
/// only the genesis block (index 0) is accepted.
pub fn check_linkage(block: &Block, tip: Option<&HashIndexState>) {
    if let Err(message) = try_check_linkage(block, tip) {
        panic!("{}", message);
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

pub fn try_check_linkage(block: &Block, tip: Option<&HashIndexState>) -> Result<(), String> {
    let header = &block.header;
    match tip {
        None => {
            if header.index != 0 {
                return Err(format!(
                    "Invariant violation: [INVARIANT:block_sequence] \
                     first block must have index 0, got {}",
                    header.index
                ));
            }
        }
        Some(tip) => {
            if Some(header.index) != tip.index.checked_add(1) {
                return Err(format!(
                    "Invariant violation: [INVARIANT:block_sequence] \
                     expected block {}, got {}",
                    tip.index as u64 + 1,
                    header.index
                ));
            }
            if header.prev_hash != tip.hash {
                return Err(format!(
                    "Invariant violation: [INVARIANT:block_linkage] \
                     block {} references {} but the tip is {}",
                    header.index, header.prev_hash, tip.hash
                ));
            }
        }
    }
    Ok(())
}

pub fn try_check_merkle_root(block: &Block) -> Result<(), String> {
    let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
    let expected = merkle_root(&hashes);
    if block.header.merkle_root != expected {
        return Err(format!(
            "Invariant violation: [INVARIANT:merkle_root] \
             block {} declares {} but its transactions hash to {}",
            block.header.index, block.header.merkle_root, expected
        ));
    }
    Ok(())
}

pub fn try_check_unique_transactions(block: &Block) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for tx in &block.transactions {
        let hash = tx.hash();
        if !seen.insert(hash) {
            return Err(format!(
                "Invariant violation: [INVARIANT:duplicate_transaction] \
                 block {} contains {} more than once",
                block.header.index, hash
            ));
        }
        if tx.signers.is_empty() {
            return Err(format!(
                "Invariant violation: [INVARIANT:tx_without_signer] \
                 transaction {} in block {} has no signers",
                hash, block.header.index
            ));
        }
    }
    Ok(())
}

pub fn try_check_primary_index(block: &Block, validators_count: usize) -> Result<(), String> {
    if block.header.primary_index as usize >= validators_count {
        return Err(format!(
            "Invariant violation: [INVARIANT:primary_index] \
             primary index {} out of range for {} validators",
            block.header.primary_index, validators_count
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Header, Signer, Transaction, UInt160, UInt256};

    fn tx(nonce: u32) -> Transaction {
        Transaction {
            version: 0,
            nonce,
            system_fee: 0,
            network_fee: 0,
            valid_until_block: 100,
            signers: vec![Signer::new(UInt160([7u8; 20]))],
            attributes: vec![],
            script: vec![],
        }
    }

    fn block(index: u32, prev_hash: UInt256, transactions: Vec<Transaction>) -> Block {
        let hashes: Vec<_> = transactions.iter().map(|t| t.hash()).collect();
        Block {
            header: Header {
                version: 0,
                prev_hash,
                merkle_root: merkle_root(&hashes),
                timestamp: 0,
                nonce: 0,
                index,
                primary_index: 0,
                next_consensus: UInt160::ZERO,
            },
            transactions,
        }
    }

    #[test]
    fn test_genesis_on_empty_ledger_passes() {
        assert!(try_validate_block(&block(0, UInt256::ZERO, vec![tx(1)]), None, 1).is_ok());
    }

    #[test]
    fn test_gap_is_rejected() {
        let tip = HashIndexState { hash: UInt256([1u8; 32]), index: 4 };
        let err = try_check_linkage(&block(6, tip.hash, vec![]), Some(&tip)).unwrap_err();
        assert!(err.contains("[INVARIANT:block_sequence]"));
    }

    #[test]
    fn test_wrong_prev_hash_is_rejected() {
        let tip = HashIndexState { hash: UInt256([1u8; 32]), index: 4 };
        let err = try_check_linkage(&block(5, UInt256([2u8; 32]), vec![]), Some(&tip)).unwrap_err();
        assert!(err.contains("[INVARIANT:block_linkage]"));
    }

    #[test]
    fn test_tampered_merkle_root_is_rejected() {
        let mut b = block(0, UInt256::ZERO, vec![tx(1), tx(2)]);
        b.transactions.pop();
        assert!(try_check_merkle_root(&b).is_err());
    }

    #[test]
    fn test_duplicate_transaction_is_rejected() {
        let b = block(0, UInt256::ZERO, vec![tx(1), tx(1)]);
        let err = try_check_unique_transactions(&b).unwrap_err();
        assert!(err.contains("duplicate_transaction"));
    }

    #[test]
    #[should_panic(expected = "primary_index")]
    fn test_primary_index_out_of_range_panics() {
        let mut b = block(0, UInt256::ZERO, vec![]);
        b.header.primary_index = 1;
        validate_block(&b, None, 1);
    }
}
