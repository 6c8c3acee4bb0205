//! Proto ↔ Kernel conversion bridge.
//!
//! Converts between protobuf wire types (proto_types.rs) and the
//! kernel's domain and storage types. Encoding is total; decoding
//! validates every fixed-width field and enum byte.

use prost::Message;

use crate::arithmetic::{amount_from_le_bytes, amount_to_le_bytes};
use crate::domain::{
    Header, PublicKey, Signer, Transaction, TransactionAttribute, TrimmedBlock, UInt160, UInt256,
    VmState,
};
use crate::error::CodecError;
use crate::proto_types::*;
use crate::storage::{AccountState, HashIndexState, TransactionState};

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn hash160(field: &'static str, bytes: &[u8]) -> Result<UInt160, CodecError> {
    UInt160::from_slice(bytes).ok_or(CodecError::InvalidLength {
        field,
        expected: UInt160::LENGTH,
        got: bytes.len(),
    })
}

fn hash256(field: &'static str, bytes: &[u8]) -> Result<UInt256, CodecError> {
    UInt256::from_slice(bytes).ok_or(CodecError::InvalidLength {
        field,
        expected: UInt256::LENGTH,
        got: bytes.len(),
    })
}

fn narrow_u8(field: &'static str, value: u32) -> Result<u8, CodecError> {
    u8::try_from(value).map_err(|_| CodecError::InvalidValue {
        field,
        value: value as u64,
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub fn transaction_to_proto(tx: &Transaction) -> ProtoTransaction {
    ProtoTransaction {
        version: tx.version as u32,
        nonce: tx.nonce,
        system_fee: tx.system_fee,
        network_fee: tx.network_fee,
        valid_until_block: tx.valid_until_block,
        signers: tx
            .signers
            .iter()
            .map(|s| ProtoSigner {
                account: s.account.as_bytes().to_vec(),
                scopes: s.scopes as u32,
            })
            .collect(),
        attributes: tx.attributes.iter().map(attribute_to_proto).collect(),
        script: tx.script.clone(),
    }
}

fn attribute_to_proto(attr: &TransactionAttribute) -> ProtoAttribute {
    let kind = match attr {
        TransactionAttribute::HighPriority => AttributeKind::HighPriority(HighPriority {}),
        TransactionAttribute::OracleResponse { id, code, result } => {
            AttributeKind::OracleResponse(OracleResponse {
                id: *id,
                code: *code as u32,
                result: result.clone(),
            })
        }
        TransactionAttribute::NotValidBefore { height } => {
            AttributeKind::NotValidBefore(NotValidBefore { height: *height })
        }
        TransactionAttribute::Conflicts { hash } => AttributeKind::Conflicts(Conflicts {
            hash: hash.as_bytes().to_vec(),
        }),
    };
    ProtoAttribute { kind: Some(kind) }
}

pub fn transaction_from_proto(proto: ProtoTransaction) -> Result<Transaction, CodecError> {
    let signers = proto
        .signers
        .iter()
        .map(|s| {
            Ok(Signer {
                account: hash160("signer.account", &s.account)?,
                scopes: narrow_u8("signer.scopes", s.scopes)?,
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;

    let attributes = proto
        .attributes
        .into_iter()
        .map(attribute_from_proto)
        .collect::<Result<Vec<_>, CodecError>>()?;

    Ok(Transaction {
        version: narrow_u8("transaction.version", proto.version)?,
        nonce: proto.nonce,
        system_fee: proto.system_fee,
        network_fee: proto.network_fee,
        valid_until_block: proto.valid_until_block,
        signers,
        attributes,
        script: proto.script,
    })
}

fn attribute_from_proto(proto: ProtoAttribute) -> Result<TransactionAttribute, CodecError> {
    match proto.kind.ok_or(CodecError::MissingField("attribute.kind"))? {
        AttributeKind::HighPriority(_) => Ok(TransactionAttribute::HighPriority),
        AttributeKind::OracleResponse(o) => Ok(TransactionAttribute::OracleResponse {
            id: o.id,
            code: narrow_u8("oracle_response.code", o.code)?,
            result: o.result,
        }),
        AttributeKind::NotValidBefore(n) => {
            Ok(TransactionAttribute::NotValidBefore { height: n.height })
        }
        AttributeKind::Conflicts(c) => Ok(TransactionAttribute::Conflicts {
            hash: hash256("conflicts.hash", &c.hash)?,
        }),
    }
}

// ---------------------------------------------------------------------------
// Headers and trimmed blocks
// ---------------------------------------------------------------------------

pub fn header_to_proto(header: &Header) -> ProtoHeader {
    ProtoHeader {
        version: header.version,
        prev_hash: header.prev_hash.as_bytes().to_vec(),
        merkle_root: header.merkle_root.as_bytes().to_vec(),
        timestamp: header.timestamp,
        nonce: header.nonce,
        index: header.index,
        primary_index: header.primary_index as u32,
        next_consensus: header.next_consensus.as_bytes().to_vec(),
    }
}

pub fn header_from_proto(proto: &ProtoHeader) -> Result<Header, CodecError> {
    Ok(Header {
        version: proto.version,
        prev_hash: hash256("header.prev_hash", &proto.prev_hash)?,
        merkle_root: hash256("header.merkle_root", &proto.merkle_root)?,
        timestamp: proto.timestamp,
        nonce: proto.nonce,
        index: proto.index,
        primary_index: narrow_u8("header.primary_index", proto.primary_index)?,
        next_consensus: hash160("header.next_consensus", &proto.next_consensus)?,
    })
}

pub fn encode_trimmed_block(block: &TrimmedBlock) -> Vec<u8> {
    ProtoTrimmedBlock {
        header: Some(header_to_proto(&block.header)),
        hashes: block.hashes.iter().map(|h| h.as_bytes().to_vec()).collect(),
    }
    .encode_to_vec()
}

pub fn decode_trimmed_block(bytes: &[u8]) -> Result<TrimmedBlock, CodecError> {
    let proto = ProtoTrimmedBlock::decode(bytes)?;
    let header = proto
        .header
        .as_ref()
        .ok_or(CodecError::MissingField("trimmed_block.header"))?;
    Ok(TrimmedBlock {
        header: header_from_proto(header)?,
        hashes: proto
            .hashes
            .iter()
            .map(|h| hash256("trimmed_block.hashes", h))
            .collect::<Result<Vec<_>, CodecError>>()?,
    })
}

// ---------------------------------------------------------------------------
// Interoperable states
// ---------------------------------------------------------------------------

pub fn encode_transaction_state(state: &TransactionState) -> Vec<u8> {
    ProtoTransactionState {
        block_index: state.block_index,
        transaction: state.transaction.as_ref().map(transaction_to_proto),
        vm_state: state.vm_state as u32,
    }
    .encode_to_vec()
}

pub fn decode_transaction_state(bytes: &[u8]) -> Result<TransactionState, CodecError> {
    let proto = ProtoTransactionState::decode(bytes)?;
    let vm_state = narrow_u8("transaction_state.vm_state", proto.vm_state)
        .ok()
        .and_then(VmState::from_u8)
        .ok_or(CodecError::InvalidValue {
            field: "transaction_state.vm_state",
            value: proto.vm_state as u64,
        })?;
    Ok(TransactionState {
        block_index: proto.block_index,
        transaction: proto.transaction.map(transaction_from_proto).transpose()?,
        vm_state,
    })
}

pub fn encode_hash_index_state(state: &HashIndexState) -> Vec<u8> {
    ProtoHashIndexState {
        hash: state.hash.as_bytes().to_vec(),
        index: state.index,
    }
    .encode_to_vec()
}

pub fn decode_hash_index_state(bytes: &[u8]) -> Result<HashIndexState, CodecError> {
    let proto = ProtoHashIndexState::decode(bytes)?;
    Ok(HashIndexState {
        hash: hash256("hash_index.hash", &proto.hash)?,
        index: proto.index,
    })
}

pub fn encode_account_state(state: &AccountState) -> Vec<u8> {
    ProtoAccountState {
        balance: amount_to_le_bytes(state.balance),
    }
    .encode_to_vec()
}

pub fn decode_account_state(bytes: &[u8]) -> Result<AccountState, CodecError> {
    let proto = ProtoAccountState::decode(bytes)?;
    let balance = amount_from_le_bytes(&proto.balance).ok_or(CodecError::InvalidLength {
        field: "account.balance",
        expected: 32,
        got: proto.balance.len(),
    })?;
    Ok(AccountState { balance })
}

// ---------------------------------------------------------------------------
// Native module records
// ---------------------------------------------------------------------------

pub fn encode_committee(members: &[PublicKey]) -> Vec<u8> {
    ProtoCommittee {
        members: members.iter().map(|k| k.as_bytes().to_vec()).collect(),
    }
    .encode_to_vec()
}

pub fn decode_committee(bytes: &[u8]) -> Result<Vec<PublicKey>, CodecError> {
    let proto = ProtoCommittee::decode(bytes)?;
    proto
        .members
        .iter()
        .map(|m| {
            PublicKey::from_slice(m).ok_or(CodecError::InvalidLength {
                field: "committee.members",
                expected: PublicKey::LENGTH,
                got: m.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 0,
            nonce: 42,
            system_fee: 100,
            network_fee: 7,
            valid_until_block: 10,
            signers: vec![Signer::new(UInt160([1u8; 20]))],
            attributes: vec![
                TransactionAttribute::Conflicts { hash: UInt256([9u8; 32]) },
                TransactionAttribute::OracleResponse { id: 3, code: 0, result: vec![1] },
            ],
            script: vec![0x40],
        }
    }

    #[test]
    fn test_conflict_stub_decodes_without_transaction() {
        let bytes = encode_transaction_state(&TransactionState::stub(12));
        let decoded = decode_transaction_state(&bytes).unwrap();
        assert!(decoded.is_stub());
        assert_eq!(decoded.block_index, 12);
    }

    #[test]
    fn test_full_record_preserves_attributes() {
        let state = TransactionState {
            block_index: 3,
            transaction: Some(sample_tx()),
            vm_state: VmState::Halt,
        };
        let decoded = decode_transaction_state(&encode_transaction_state(&state)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_bad_hash_length_is_rejected() {
        let proto = ProtoHashIndexState { hash: vec![1, 2, 3], index: 0 };
        let err = decode_hash_index_state(&proto.encode_to_vec()).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidLength { field: "hash_index.hash", expected: 32, got: 3 }
        );
    }

    #[test]
    fn test_unknown_vm_state_is_rejected() {
        let proto = ProtoTransactionState { block_index: 0, transaction: None, vm_state: 3 };
        assert!(decode_transaction_state(&proto.encode_to_vec()).is_err());
    }
}
