mod common;

use common::*;
use ledger_kernel::domain::{TransactionAttribute, VmState};
use ledger_kernel::engine::persist_block;
use ledger_kernel::error::ContractError;
use ledger_kernel::interop::{BlockRef, StackItem};
use ledger_kernel::native::{NativeModule, NativeRegistry};
use ledger_kernel::storage::{DataCache, MemoryStore, Store};
use primitive_types::U256;

#[test]
fn empty_ledger_is_not_initialized() {
    let store = MemoryStore::new();
    let registry = NativeRegistry::new();
    let cache = DataCache::new(store.snapshot());
    assert!(!registry.ledger().initialized(&cache).unwrap());
    assert_eq!(registry.ledger().current_tip(&cache).unwrap(), None);

    let chain = Chain::new(default_settings());
    assert!(chain.registry.ledger().initialized(&chain.cache()).unwrap());
}

#[test]
fn conflict_stub_round_trip() {
    let mut chain = Chain::new(default_settings());
    let signer = account(1);
    let other = account(3);
    let victim = tx(account(2), 1, 0, 0);
    let declaring = with_attribute(
        tx(signer, 2, 0, 0),
        TransactionAttribute::Conflicts { hash: victim.hash() },
    );
    chain.push(vec![declaring.clone()]);

    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    let window = chain.settings.max_traceable_blocks;
    assert!(ledger.contains_conflict_hash(&cache, &victim.hash(), &[signer], window).unwrap());
    assert!(!ledger.contains_conflict_hash(&cache, &victim.hash(), &[other], window).unwrap());
    assert!(ledger.contains_conflict_hash(&cache, &victim.hash(), &[other, signer], window).unwrap());

    // The stub is not a transaction.
    assert!(!ledger.contains_transaction(&cache, &victim.hash()).unwrap());
    assert_eq!(ledger.get_transaction(&cache, &victim.hash()).unwrap(), None);
    assert!(ledger.contains_transaction(&cache, &declaring.hash()).unwrap());

    // Persisting the victim itself replaces the stub with a full record.
    chain.push(vec![victim.clone()]);
    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    assert!(ledger.contains_transaction(&cache, &victim.hash()).unwrap());
    assert!(!ledger.contains_conflict_hash(&cache, &victim.hash(), &[signer], window).unwrap());
}

#[test]
fn conflict_with_stored_transaction_keeps_full_record() {
    let mut chain = Chain::new(default_settings());
    let original = tx(account(1), 1, 0, 0);
    chain.push(vec![original.clone()]);

    let late = with_attribute(
        tx(account(2), 2, 0, 0),
        TransactionAttribute::Conflicts { hash: original.hash() },
    );
    chain.push(vec![late]);

    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    assert_eq!(ledger.get_transaction(&cache, &original.hash()).unwrap(), Some(original.clone()));
    // A full record never counts as a conflict, even for a co-signer.
    assert!(!ledger
        .contains_conflict_hash(&cache, &original.hash(), &[account(2)], 100)
        .unwrap());
}

#[test]
fn conflict_stub_covers_every_signer_of_declaring_transaction() {
    let mut chain = Chain::new(default_settings());
    let victim = tx(account(5), 1, 0, 0);
    let declaring = with_signer(
        with_attribute(tx(account(1), 2, 0, 0), TransactionAttribute::Conflicts { hash: victim.hash() }),
        account(2),
    );
    chain.push(vec![declaring]);

    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    assert!(ledger.contains_conflict_hash(&cache, &victim.hash(), &[account(2)], 100).unwrap());
    assert!(!ledger.contains_conflict_hash(&cache, &victim.hash(), &[account(5)], 100).unwrap());
}

#[test]
fn traceability_boundary() {
    // window 3: block 1 is traceable at height 3, not at height 4.
    let mut chain = Chain::new(settings(4, 4, 3));
    chain.push(vec![tx(account(1), 1, 0, 0)]);
    chain.push(vec![]);
    chain.push(vec![]);
    assert_eq!(chain.height, 3);

    let window = chain.settings.max_traceable_blocks;
    let ledger = chain.registry.ledger();
    assert!(ledger.is_traceable_block(&chain.cache(), 1, window).unwrap());
    let probe = tx(account(9), 99, 0, 0);
    let index_arg = [StackItem::ByteString(vec![1])];
    assert!(matches!(
        chain.call(&probe, &ledger.address(), "getBlock", &index_arg).unwrap(),
        StackItem::Array(_)
    ));

    chain.push(vec![]);
    let ledger = chain.registry.ledger();
    assert!(!ledger.is_traceable_block(&chain.cache(), 1, window).unwrap());
    assert_eq!(
        chain.call(&probe, &ledger.address(), "getBlock", &index_arg).unwrap(),
        StackItem::Null
    );
    // Future blocks are never traceable.
    assert!(!ledger.is_traceable_block(&chain.cache(), 5, window).unwrap());
}

#[test]
fn blocks_and_transactions_are_retrievable() {
    let mut chain = Chain::new(default_settings());
    let first = tx(account(1), 1, 0, 0);
    let second = tx(account(2), 2, 0, 0);
    let block = chain.next_block(vec![first.clone(), second.clone()]);
    chain.persist(&block);

    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    assert_eq!(ledger.current_hash(&cache).unwrap(), block.hash());
    assert_eq!(ledger.current_index(&cache).unwrap(), 1);
    assert_eq!(ledger.get_block_hash(&cache, 1).unwrap(), Some(block.hash()));
    assert!(ledger.contains_block(&cache, &block.hash()).unwrap());
    assert_eq!(ledger.get_block(&cache, &BlockRef::Index(1)).unwrap(), Some(block.clone()));
    assert_eq!(ledger.get_block(&cache, &BlockRef::Hash(block.hash())).unwrap(), Some(block.clone()));
    assert_eq!(ledger.get_header(&cache, &BlockRef::Index(1)).unwrap(), Some(block.header.clone()));
    assert_eq!(ledger.get_block(&cache, &BlockRef::Index(7)).unwrap(), None);
    assert_eq!(ledger.get_trimmed_block(&cache, &block.hash()).unwrap(), Some(block.trim()));

    let state = ledger.get_transaction_state(&cache, &second.hash()).unwrap().unwrap();
    assert_eq!(state.block_index, 1);
    assert_eq!(state.vm_state, VmState::Halt);
}

#[test]
fn contract_methods_follow_ledger_state() {
    let mut chain = Chain::new(default_settings());
    let stored = tx(account(1), 1, 0, 0);
    let block = chain.next_block(vec![stored.clone()]);
    chain.persist(&block);

    let ledger = chain.registry.ledger().address();
    let probe = tx(account(9), 99, 0, 0);
    let hash_arg = |tx: &ledger_kernel::domain::Transaction| [StackItem::from_hash256(&tx.hash())];

    assert_eq!(
        chain.call(&probe, &ledger, "currentIndex", &[]).unwrap(),
        StackItem::Integer(1)
    );
    assert_eq!(
        chain.call(&probe, &ledger, "getTransactionHeight", &hash_arg(&stored)).unwrap(),
        StackItem::Integer(1)
    );
    assert_eq!(
        chain.call(&probe, &ledger, "getTransactionHeight", &hash_arg(&probe)).unwrap(),
        StackItem::Integer(-1)
    );
    assert_eq!(
        chain.call(&probe, &ledger, "getTransactionVMState", &hash_arg(&stored)).unwrap(),
        StackItem::Integer(VmState::Halt as i128)
    );
    assert_eq!(
        chain.call(&probe, &ledger, "getTransaction", &hash_arg(&probe)).unwrap(),
        StackItem::Null
    );
    assert_eq!(
        chain.call(&probe, &ledger, "getTransactionSigners", &hash_arg(&stored)).unwrap(),
        StackItem::Array(vec![StackItem::from_signer(&stored.signers[0])])
    );

    let from_block = chain
        .call(
            &probe,
            &ledger,
            "getTransactionFromBlock",
            &[StackItem::from_hash256(&block.hash()), StackItem::Integer(0)],
        )
        .unwrap();
    assert_eq!(from_block, StackItem::from_transaction(&stored));
}

#[test]
fn contract_argument_errors_are_not_fatal() {
    let mut chain = Chain::new(default_settings());
    chain.push(vec![tx(account(1), 1, 0, 0)]);
    let ledger = chain.registry.ledger().address();
    let probe = tx(account(9), 99, 0, 0);

    let oversized = [StackItem::ByteString(vec![0u8; 33])];
    assert!(matches!(
        chain.call(&probe, &ledger, "getBlock", &oversized),
        Err(ContractError::InvalidArgument(_))
    ));
    let negative = [StackItem::ByteString(vec![0xff])];
    assert!(matches!(
        chain.call(&probe, &ledger, "getBlock", &negative),
        Err(ContractError::InvalidArgument(_))
    ));
    let out_of_range = [StackItem::ByteString(vec![1]), StackItem::Integer(5)];
    assert!(matches!(
        chain.call(&probe, &ledger, "getTransactionFromBlock", &out_of_range),
        Err(ContractError::InvalidArgument(_))
    ));
    let short_hash = [StackItem::ByteString(vec![1, 2, 3])];
    assert!(matches!(
        chain.call(&probe, &ledger, "getTransaction", &short_hash),
        Err(ContractError::InvalidArgument(_))
    ));
    assert!(matches!(
        chain.call(&probe, &ledger, "noSuchMethod", &[]),
        Err(ContractError::MethodNotFound { .. })
    ));
}

#[test]
fn faulted_transaction_keeps_record_but_not_writes() {
    let mut chain = Chain::new(default_settings());
    let holder = chain.holder();
    let target = account(4);
    let mut faulting = tx(holder, 1, 0, 0);
    faulting.script = faulting_transfer_script(&target, 500);
    let persisted = chain.push(vec![faulting.clone()]);

    let cache = chain.cache();
    assert_eq!(chain.registry.gas().balance_of(&cache, &target).unwrap(), U256::zero());
    let state = chain
        .registry
        .ledger()
        .get_transaction_state(&cache, &faulting.hash())
        .unwrap()
        .unwrap();
    assert_eq!(state.vm_state, VmState::Fault);

    let executed = persisted
        .executed
        .iter()
        .find(|e| e.transaction == Some(faulting.hash()))
        .unwrap();
    assert_eq!(executed.vm_state, VmState::Fault);
    assert!(executed.notifications.is_empty());
}

#[test]
#[should_panic(expected = "block_sequence")]
fn out_of_order_block_is_fatal() {
    let mut chain = Chain::new(default_settings());
    let skipped = chain.block_at(chain.height + 2, chain.tip, vec![]);
    chain.persist(&skipped);
}

#[test]
#[should_panic(expected = "block_linkage")]
fn block_with_foreign_parent_is_fatal() {
    let chain = Chain::new(default_settings());
    let orphan = chain.block_at(1, ledger_kernel::domain::UInt256([7u8; 32]), vec![]);
    let _ = persist_block(
        chain.store.snapshot(),
        &chain.registry,
        &chain.settings,
        &orphan,
        &mut ledger_kernel::engine::HaltExecutor,
    );
}

#[test]
fn reads_are_idempotent() {
    let mut chain = Chain::new(settings(4, 4, 3));
    let stored = tx(account(1), 1, 0, 0);
    chain.push(vec![stored.clone()]);

    let cache = chain.cache();
    let ledger = chain.registry.ledger();
    let first = (
        ledger.is_traceable_block(&cache, 1, 3).unwrap(),
        ledger.get_transaction(&cache, &stored.hash()).unwrap(),
        ledger.get_block(&cache, &BlockRef::Index(1)).unwrap(),
        ledger.contains_conflict_hash(&cache, &stored.hash(), &[account(1)], 3).unwrap(),
    );
    let second = (
        ledger.is_traceable_block(&cache, 1, 3).unwrap(),
        ledger.get_transaction(&cache, &stored.hash()).unwrap(),
        ledger.get_block(&cache, &BlockRef::Index(1)).unwrap(),
        ledger.contains_conflict_hash(&cache, &stored.hash(), &[account(1)], 3).unwrap(),
    );
    assert_eq!(first, second);
    assert_eq!(cache.pending_writes(), 0);
}
