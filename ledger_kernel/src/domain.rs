/// Core Domain Types
///
/// Pure data plus identity (hash) helpers. No persistence logic.
/// Fees are u64 in the smallest unit; balances are U256.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::arithmetic::fee_total;
use crate::hashing;

// ── Hashes ─────────────────────────────────────────────────────────

/// 20-byte script hash. Used for accounts and module addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UInt160(pub [u8; 20]);

/// 32-byte hash of a block or transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UInt256(pub [u8; 32]);

impl UInt160 {
    pub const LENGTH: usize = 20;
    pub const ZERO: UInt160 = UInt160([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 20]>::try_from(bytes).ok().map(UInt160)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl UInt256 {
    pub const LENGTH: usize = 32;
    pub const ZERO: UInt256 = UInt256([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(UInt256)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for UInt160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for UInt160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ── Keys ───────────────────────────────────────────────────────────

/// Compressed EC public key (33 bytes). Opaque to the kernel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    pub const LENGTH: usize = 33;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LENGTH || !matches!(bytes[0], 0x02 | 0x03) {
            return None;
        }
        let mut buf = [0u8; 33];
        buf.copy_from_slice(bytes);
        Some(PublicKey(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for PublicKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| format!("invalid public key hex {:?}: {}", s, e))?;
        PublicKey::from_slice(&bytes)
            .ok_or_else(|| format!("invalid compressed public key {:?}", s))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

// ── Transactions ───────────────────────────────────────────────────

/// Terminal state of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VmState {
    #[default]
    None = 0,
    Halt = 1,
    Fault = 2,
    Break = 4,
}

impl VmState {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(VmState::None),
            1 => Some(VmState::Halt),
            2 => Some(VmState::Fault),
            4 => Some(VmState::Break),
            _ => None,
        }
    }
}

/// Account that signed a transaction, with its witness scope byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub account: UInt160,
    pub scopes: u8,
}

impl Signer {
    pub const CALLED_BY_ENTRY: u8 = 0x01;

    pub fn new(account: UInt160) -> Self {
        Self {
            account,
            scopes: Self::CALLED_BY_ENTRY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAttribute {
    HighPriority,
    /// One-shot response to an external oracle request.
    OracleResponse { id: u64, code: u8, result: Vec<u8> },
    NotValidBefore { height: u32 },
    /// Declares that the transaction with `hash` must not be accepted.
    Conflicts { hash: UInt256 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    pub system_fee: u64,
    pub network_fee: u64,
    pub valid_until_block: u32,
    /// First signer is the sender and pays the fees.
    pub signers: Vec<Signer>,
    pub attributes: Vec<TransactionAttribute>,
    pub script: Vec<u8>,
}

impl Transaction {
    pub fn hash(&self) -> UInt256 {
        hashing::transaction_hash(self)
    }

    /// Fee payer. Transactions without signers never pass admission.
    pub fn sender(&self) -> UInt160 {
        match self.signers.first() {
            Some(signer) => signer.account,
            None => panic!(
                "Invariant violation: [INVARIANT:tx_without_signer] \
                 transaction has no signers"
            ),
        }
    }

    pub fn fee(&self) -> U256 {
        fee_total(self.system_fee, self.network_fee)
    }

    /// Encoded size in bytes, used for the fee-per-byte rule.
    pub fn size(&self) -> usize {
        hashing::transaction_bytes(self).len()
    }

    pub fn signer_accounts(&self) -> impl Iterator<Item = UInt160> + '_ {
        self.signers.iter().map(|s| s.account)
    }

    pub fn oracle_response_id(&self) -> Option<u64> {
        self.attributes.iter().find_map(|a| match a {
            TransactionAttribute::OracleResponse { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn conflict_hashes(&self) -> impl Iterator<Item = UInt256> + '_ {
        self.attributes.iter().filter_map(|a| match a {
            TransactionAttribute::Conflicts { hash } => Some(*hash),
            _ => None,
        })
    }

    pub fn is_high_priority(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, TransactionAttribute::HighPriority))
    }
}

// ── Blocks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_hash: UInt256,
    pub merkle_root: UInt256,
    pub timestamp: u64,
    pub nonce: u64,
    pub index: u32,
    /// Position of the proposer in the next-block validator list.
    pub primary_index: u8,
    pub next_consensus: UInt160,
}

impl Header {
    pub fn hash(&self) -> UInt256 {
        hashing::header_hash(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }

    pub fn total_network_fee(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::zero(), |acc, tx| acc + U256::from(tx.network_fee))
    }

    pub fn total_system_fee(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::zero(), |acc, tx| acc + U256::from(tx.system_fee))
    }

    /// Durable form: header plus ordered transaction hashes.
    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            header: self.header.clone(),
            hashes: self.transactions.iter().map(Transaction::hash).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedBlock {
    pub header: Header,
    pub hashes: Vec<UInt256>,
}

impl TrimmedBlock {
    pub fn hash(&self) -> UInt256 {
        self.header.hash()
    }

    pub fn index(&self) -> u32 {
        self.header.index
    }
}

// ── Hardforks ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hardfork {
    HfAspidochelone,
    HfBasilisk,
    HfCockatrice,
    HfDomovoi,
    HfEchidna,
}

impl Hardfork {
    pub const ALL: [Hardfork; 5] = [
        Hardfork::HfAspidochelone,
        Hardfork::HfBasilisk,
        Hardfork::HfCockatrice,
        Hardfork::HfDomovoi,
        Hardfork::HfEchidna,
    ];
}
