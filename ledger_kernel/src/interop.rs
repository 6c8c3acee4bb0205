//! Values exchanged between the executor and native modules.

use primitive_types::U256;

use crate::domain::{Header, Signer, Transaction, TrimmedBlock, UInt160, UInt256};
use crate::error::ContractError;

/// Typed argument / return value of a native method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackItem {
    Null,
    Boolean(bool),
    Integer(i128),
    ByteString(Vec<u8>),
    Array(Vec<StackItem>),
}

impl StackItem {
    pub fn from_hash160(hash: &UInt160) -> Self {
        StackItem::ByteString(hash.as_bytes().to_vec())
    }

    pub fn from_hash256(hash: &UInt256) -> Self {
        StackItem::ByteString(hash.as_bytes().to_vec())
    }

    /// Amounts beyond `i128::MAX` cannot be returned to scripts.
    pub fn from_amount(amount: U256) -> Result<Self, ContractError> {
        u128::try_from(amount)
            .ok()
            .and_then(|v| i128::try_from(v).ok())
            .map(StackItem::Integer)
            .ok_or_else(|| ContractError::InvalidArgument(format!("amount {} out of range", amount)))
    }

    pub fn from_header(hash: UInt256, header: &Header, tx_count: usize) -> Self {
        StackItem::Array(vec![
            Self::from_hash256(&hash),
            StackItem::Integer(header.version as i128),
            Self::from_hash256(&header.prev_hash),
            Self::from_hash256(&header.merkle_root),
            StackItem::Integer(header.timestamp as i128),
            StackItem::Integer(header.nonce as i128),
            StackItem::Integer(header.index as i128),
            StackItem::Integer(header.primary_index as i128),
            Self::from_hash160(&header.next_consensus),
            StackItem::Integer(tx_count as i128),
        ])
    }

    pub fn from_trimmed_block(block: &TrimmedBlock) -> Self {
        Self::from_header(block.hash(), &block.header, block.hashes.len())
    }

    pub fn from_transaction(tx: &Transaction) -> Self {
        StackItem::Array(vec![
            Self::from_hash256(&tx.hash()),
            StackItem::Integer(tx.version as i128),
            StackItem::Integer(tx.nonce as i128),
            Self::from_hash160(&tx.sender()),
            StackItem::Integer(tx.system_fee as i128),
            StackItem::Integer(tx.network_fee as i128),
            StackItem::Integer(tx.valid_until_block as i128),
            StackItem::ByteString(tx.script.clone()),
        ])
    }

    pub fn from_signer(signer: &Signer) -> Self {
        StackItem::Array(vec![
            Self::from_hash160(&signer.account),
            StackItem::Integer(signer.scopes as i128),
        ])
    }
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

pub fn arg<'a>(args: &'a [StackItem], index: usize, name: &str) -> Result<&'a StackItem, ContractError> {
    args.get(index)
        .ok_or_else(|| ContractError::InvalidArgument(format!("missing argument {}", name)))
}

pub fn expect_args(args: &[StackItem], count: usize) -> Result<(), ContractError> {
    if args.len() != count {
        return Err(ContractError::InvalidArgument(format!(
            "expected {} arguments, got {}",
            count,
            args.len()
        )));
    }
    Ok(())
}

pub fn bytes_arg<'a>(args: &'a [StackItem], index: usize, name: &str) -> Result<&'a [u8], ContractError> {
    match arg(args, index, name)? {
        StackItem::ByteString(bytes) => Ok(bytes),
        other => Err(ContractError::InvalidArgument(format!(
            "{} must be a byte string, got {:?}",
            name, other
        ))),
    }
}

pub fn hash160_arg(args: &[StackItem], index: usize, name: &str) -> Result<UInt160, ContractError> {
    let bytes = bytes_arg(args, index, name)?;
    UInt160::from_slice(bytes).ok_or_else(|| {
        ContractError::InvalidArgument(format!("{} must be {} bytes", name, UInt160::LENGTH))
    })
}

pub fn hash256_arg(args: &[StackItem], index: usize, name: &str) -> Result<UInt256, ContractError> {
    let bytes = bytes_arg(args, index, name)?;
    UInt256::from_slice(bytes).ok_or_else(|| {
        ContractError::InvalidArgument(format!("{} must be {} bytes", name, UInt256::LENGTH))
    })
}

pub fn integer_arg(args: &[StackItem], index: usize, name: &str) -> Result<i128, ContractError> {
    match arg(args, index, name)? {
        StackItem::Integer(v) => Ok(*v),
        other => Err(ContractError::InvalidArgument(format!(
            "{} must be an integer, got {:?}",
            name, other
        ))),
    }
}

pub fn amount_arg(args: &[StackItem], index: usize, name: &str) -> Result<U256, ContractError> {
    let value = integer_arg(args, index, name)?;
    if value < 0 {
        return Err(ContractError::InvalidArgument(format!("{} must not be negative", name)));
    }
    Ok(U256::from(value as u128))
}

/// Block height given as a little-endian two's-complement integer of
/// fewer than 32 bytes.
pub fn index_from_le_bytes(bytes: &[u8]) -> Result<u32, ContractError> {
    if bytes.len() >= UInt256::LENGTH {
        return Err(ContractError::InvalidArgument(format!(
            "index must be shorter than {} bytes",
            UInt256::LENGTH
        )));
    }
    let negative = bytes.last().map(|b| b & 0x80 != 0).unwrap_or(false);
    if negative {
        return Err(ContractError::InvalidArgument("index must not be negative".to_string()));
    }
    let significant = bytes.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
    if significant > 4 {
        return Err(ContractError::InvalidArgument("index exceeds u32 range".to_string()));
    }
    let mut buf = [0u8; 4];
    buf[..significant].copy_from_slice(&bytes[..significant]);
    Ok(u32::from_le_bytes(buf))
}

/// Either a block index (< 32 bytes) or a block hash (exactly 32 bytes).
pub enum BlockRef {
    Index(u32),
    Hash(UInt256),
}

pub fn block_ref_arg(args: &[StackItem], index: usize, name: &str) -> Result<BlockRef, ContractError> {
    let bytes = bytes_arg(args, index, name)?;
    match bytes.len() {
        n if n < UInt256::LENGTH => Ok(BlockRef::Index(index_from_le_bytes(bytes)?)),
        n if n == UInt256::LENGTH => Ok(BlockRef::Hash(UInt256::from_slice(bytes).ok_or_else(
            || ContractError::InvalidArgument(format!("{} is not a hash", name)),
        )?)),
        _ => Err(ContractError::InvalidArgument(format!(
            "{} must be an index or a {}-byte hash",
            name,
            UInt256::LENGTH
        ))),
    }
}
