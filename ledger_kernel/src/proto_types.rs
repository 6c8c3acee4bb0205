//! Hand-written protobuf types for every durable ledger value.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are part of the storage layout and never change.

use prost::Message;

// ── Transaction ────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoSigner {
    #[prost(bytes = "vec", tag = "1")]
    pub account: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub scopes: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoAttribute {
    #[prost(oneof = "AttributeKind", tags = "1, 2, 3, 4")]
    pub kind: Option<AttributeKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum AttributeKind {
    #[prost(message, tag = "1")]
    HighPriority(HighPriority),
    #[prost(message, tag = "2")]
    OracleResponse(OracleResponse),
    #[prost(message, tag = "3")]
    NotValidBefore(NotValidBefore),
    #[prost(message, tag = "4")]
    Conflicts(Conflicts),
}

#[derive(Clone, PartialEq, Message)]
pub struct HighPriority {}

#[derive(Clone, PartialEq, Message)]
pub struct OracleResponse {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub result: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NotValidBefore {
    #[prost(uint32, tag = "1")]
    pub height: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Conflicts {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoTransaction {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(uint32, tag = "2")]
    pub nonce: u32,
    #[prost(uint64, tag = "3")]
    pub system_fee: u64,
    #[prost(uint64, tag = "4")]
    pub network_fee: u64,
    #[prost(uint32, tag = "5")]
    pub valid_until_block: u32,
    #[prost(message, repeated, tag = "6")]
    pub signers: Vec<ProtoSigner>,
    #[prost(message, repeated, tag = "7")]
    pub attributes: Vec<ProtoAttribute>,
    #[prost(bytes = "vec", tag = "8")]
    pub script: Vec<u8>,
}

// ── Block ──────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoHeader {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub prev_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub merkle_root: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,
    #[prost(uint64, tag = "5")]
    pub nonce: u64,
    #[prost(uint32, tag = "6")]
    pub index: u32,
    #[prost(uint32, tag = "7")]
    pub primary_index: u32,
    #[prost(bytes = "vec", tag = "8")]
    pub next_consensus: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoTrimmedBlock {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ProtoHeader>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub hashes: Vec<Vec<u8>>,
}

// ── Interoperable states ───────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoTransactionState {
    #[prost(uint32, tag = "1")]
    pub block_index: u32,
    /// Absent for a conflict stub.
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<ProtoTransaction>,
    #[prost(uint32, tag = "3")]
    pub vm_state: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoHashIndexState {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub index: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoAccountState {
    /// Minimal little-endian balance.
    #[prost(bytes = "vec", tag = "1")]
    pub balance: Vec<u8>,
}

// ── Native module records ──────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoCommittee {
    /// Compressed public keys in committee order.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub members: Vec<Vec<u8>>,
}
