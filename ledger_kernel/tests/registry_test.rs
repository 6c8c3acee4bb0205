mod common;

use common::*;
use ledger_kernel::domain::{Signer, Transaction, UInt160};
use ledger_kernel::error::ContractError;
use ledger_kernel::hashing::committee_address;
use ledger_kernel::interop::StackItem;
use ledger_kernel::native::policy::DEFAULT_FEE_PER_BYTE;
use ledger_kernel::native::{NativeModule, NativeRegistry};
use ledger_kernel::storage::StorageKey;

fn committee_tx(chain: &Chain) -> Transaction {
    let committee = committee_address(&chain.settings.standby_committee);
    let mut t = tx(committee, 1, 0, 0);
    t.signers = vec![Signer::new(committee)];
    t
}

#[test]
fn modules_get_sequential_negative_ids() {
    let registry = NativeRegistry::new();
    let ids: Vec<_> = registry.modules().map(|m| m.id()).collect();
    assert_eq!(ids, vec![-1, -2, -3, -4]);
    assert_eq!(registry.ledger().id(), -1);
    assert_eq!(registry.gas().id(), -3);
}

#[test]
fn module_keys_live_in_their_namespace() {
    let chain = Chain::new(default_settings());
    let cache = chain.cache();
    for module in chain.registry.modules() {
        let prefix = module.id().to_le_bytes();
        for (key, _) in cache.find(&prefix).unwrap() {
            assert_eq!(&key[..4], &prefix);
        }
    }
    // Gas total supply sits under id -3, prefix 11.
    let key = StorageKey::new(-3, 11);
    assert!(cache.contains(&key).unwrap());
}

#[test]
fn invoke_routes_by_address() {
    let chain = Chain::new(default_settings());
    let probe = tx(account(9), 1, 0, 0);
    let policy = chain.registry.policy().address();

    assert_eq!(
        chain.call(&probe, &policy, "getFeePerByte", &[]).unwrap(),
        StackItem::Integer(DEFAULT_FEE_PER_BYTE as i128)
    );
    assert_eq!(
        chain.call(&probe, &UInt160([3u8; 20]), "getFeePerByte", &[]),
        Err(ContractError::NotNative(UInt160([3u8; 20])))
    );
    assert!(matches!(
        chain.call(&probe, &policy, "setGasPerBlock", &[]),
        Err(ContractError::MethodNotFound { .. })
    ));
}

#[test]
fn committee_methods() {
    let chain = Chain::new(settings(4, 2, 100));
    let probe = tx(account(9), 1, 0, 0);
    let committee = chain.registry.committee().address();

    let StackItem::Array(members) = chain.call(&probe, &committee, "getCommittee", &[]).unwrap() else {
        panic!("getCommittee must return an array");
    };
    assert_eq!(members.len(), 4);
    let StackItem::Array(validators) = chain.call(&probe, &committee, "getNextBlockValidators", &[]).unwrap() else {
        panic!("getNextBlockValidators must return an array");
    };
    assert_eq!(validators.len(), 2);
    assert_eq!(
        chain.call(&probe, &committee, "getCommitteeAddress", &[]).unwrap(),
        StackItem::from_hash160(&committee_address(&chain.settings.standby_committee))
    );
}

#[test]
fn committee_witness_gates_policy_setters() {
    let chain = Chain::new(default_settings());
    let policy = chain.registry.policy().address();
    let stranger = tx(account(9), 1, 0, 0);
    let committee = committee_tx(&chain);

    assert_eq!(
        chain.call(&stranger, &policy, "setFeePerByte", &[StackItem::Integer(5)]),
        Err(ContractError::Unauthorized("committee witness required"))
    );
    assert_eq!(
        chain.call(&committee, &policy, "setFeePerByte", &[StackItem::Integer(5)]),
        Ok(StackItem::Null)
    );
    assert!(matches!(
        chain.call(&committee, &policy, "setFeePerByte", &[StackItem::Integer(100_000_001)]),
        Err(ContractError::InvalidArgument(_))
    ));

    let target = [StackItem::from_hash160(&account(4))];
    assert_eq!(
        chain.call(&stranger, &policy, "blockAccount", &target),
        Err(ContractError::Unauthorized("committee witness required"))
    );
    assert_eq!(
        chain.call(&committee, &policy, "blockAccount", &target),
        Ok(StackItem::Boolean(true))
    );
    // Each call runs on a fresh snapshot, so nothing was committed.
    assert_eq!(
        chain.call(&committee, &policy, "unblockAccount", &target),
        Ok(StackItem::Boolean(false))
    );

    let native = [StackItem::from_hash160(&chain.registry.gas().address())];
    assert!(matches!(
        chain.call(&committee, &policy, "blockAccount", &native),
        Err(ContractError::InvalidArgument(_))
    ));
}

#[test]
fn policy_writes_are_visible_within_one_engine() {
    use ledger_kernel::engine::{ApplicationEngine, TriggerType};

    let chain = Chain::new(default_settings());
    let committee = committee_tx(&chain);
    let policy = chain.registry.policy().address();
    let target = [StackItem::from_hash160(&account(4))];

    let mut engine = ApplicationEngine::new(
        TriggerType::Application,
        chain.cache(),
        &chain.settings,
        &chain.registry,
    )
    .with_container(&committee);
    assert!(chain.registry.committee_has_witnessed(&engine).unwrap());
    engine.call_native(&policy, "blockAccount", &target).unwrap();
    assert_eq!(
        engine.call_native(&policy, "isBlocked", &target).unwrap(),
        StackItem::Boolean(true)
    );
    assert_eq!(
        engine.call_native(&policy, "blockAccount", &target).unwrap(),
        StackItem::Boolean(false)
    );
    engine.call_native(&policy, "setFeePerByte", &[StackItem::Integer(42)]).unwrap();
    assert_eq!(chain.registry.policy().get_fee_per_byte(&engine.snapshot).unwrap(), 42);
    assert_eq!(
        engine.call_native(&policy, "unblockAccount", &target).unwrap(),
        StackItem::Boolean(true)
    );
}
