#![forbid(unsafe_code)]

//! Ledger kernel: deterministic block application over a versioned
//! key-value store.
//!
//! Every node that applies the same block to the same snapshot must
//! produce a byte-identical changeset. Nothing in this crate reads
//! clocks, randomness or global state.

/// Storage layout version. Changing any prefix or key encoding
/// requires bumping this value.
pub const LAYOUT_VERSION: u32 = 1;

pub mod arithmetic;
pub mod domain;
pub mod error;
pub mod hashing;
pub mod proto_types;
pub mod proto_bridge;
pub mod settings;
pub mod storage;
pub mod interop;
pub mod engine;
pub mod invariants;
pub mod native;
pub mod admission;
