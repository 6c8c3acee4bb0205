/// Canonical Hashing
///
/// Deterministic identities for transactions, headers, accounts and
/// native modules, plus the canonical digest of a whole store.
/// Produces byte-identical output across platforms.
///
/// Rules:
///   - Transaction / header hash = SHA-256 of the prost encoding
///   - Address (UInt160) = first 20 bytes of SHA-256(SHA-256(script))
///   - Multisig scripts list keys in ascending byte order
///   - Merkle root: pairwise SHA-256, odd leaf paired with itself

use prost::Message;
use sha2::{Digest, Sha256};

use crate::domain::{Header, PublicKey, Transaction, UInt160, UInt256};
use crate::proto_bridge::{header_to_proto, transaction_to_proto};

/// Opcode-like tags of the verification scripts. They only need to be
/// distinct and stable.
const SCRIPT_SIGNATURE: u8 = 0x41;
const SCRIPT_MULTISIG: u8 = 0xae;
const SCRIPT_NATIVE: u8 = 0x00;

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Canonical transaction bytes.
pub fn transaction_bytes(tx: &Transaction) -> Vec<u8> {
    transaction_to_proto(tx).encode_to_vec()
}

pub fn transaction_hash(tx: &Transaction) -> UInt256 {
    UInt256(sha256(&transaction_bytes(tx)))
}

pub fn header_hash(header: &Header) -> UInt256 {
    UInt256(sha256(&header_to_proto(header).encode_to_vec()))
}

/// Script hash of arbitrary verification bytes.
pub fn hash160(script: &[u8]) -> UInt160 {
    let digest = sha256(&sha256(script));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    UInt160(out)
}

pub fn signature_script(key: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(PublicKey::LENGTH + 1);
    script.extend_from_slice(key.as_bytes());
    script.push(SCRIPT_SIGNATURE);
    script
}

/// `m`-of-`keys.len()` script. Keys are sorted so that the address does
/// not depend on configuration order.
pub fn multisig_script(m: usize, keys: &[PublicKey]) -> Vec<u8> {
    if m == 0 || m > keys.len() || keys.len() > u8::MAX as usize {
        panic!(
            "Invariant violation: [INVARIANT:multisig_threshold] \
             invalid threshold {} for {} keys",
            m,
            keys.len()
        );
    }
    let mut sorted = keys.to_vec();
    sorted.sort();
    let mut script = Vec::with_capacity(sorted.len() * PublicKey::LENGTH + 3);
    script.push(m as u8);
    for key in &sorted {
        script.extend_from_slice(key.as_bytes());
    }
    script.push(sorted.len() as u8);
    script.push(SCRIPT_MULTISIG);
    script
}

pub fn signature_address(key: &PublicKey) -> UInt160 {
    hash160(&signature_script(key))
}

/// Address controlled by a byzantine-fault-tolerant majority of
/// `validators`: `n - (n - 1) / 3` signatures.
pub fn bft_address(validators: &[PublicKey]) -> UInt160 {
    let n = validators.len();
    hash160(&multisig_script(n - (n.saturating_sub(1)) / 3, validators))
}

/// Address controlled by a simple majority of the committee:
/// `n - (n - 1) / 2` signatures.
pub fn committee_address(committee: &[PublicKey]) -> UInt160 {
    let n = committee.len();
    hash160(&multisig_script(n - (n.saturating_sub(1)) / 2, committee))
}

/// Deterministic address of a native module, derived from its name.
pub fn native_address(name: &str) -> UInt160 {
    let mut script = Vec::with_capacity(name.len() + 1);
    script.push(SCRIPT_NATIVE);
    script.extend_from_slice(name.as_bytes());
    hash160(&script)
}

/// Merkle root over transaction hashes. Zero for an empty list.
pub fn merkle_root(hashes: &[UInt256]) -> UInt256 {
    if hashes.is_empty() {
        return UInt256::ZERO;
    }
    let mut level: Vec<[u8; 32]> = hashes.iter().map(|h| h.0).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }
    UInt256(level[0])
}

/// SHA-256 over every `(key, value)` pair in key order, each field
/// length-prefixed. Lowercase hex string.
pub fn state_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>,
{
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update((key.len() as u32).to_le_bytes());
        hasher.update(key);
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value);
    }
    hex::encode(hasher.finalize())
}
