#![forbid(unsafe_code)]

//! Ledger runtime
//!
//! Wraps the deterministic kernel with durable storage, a block driver,
//! the transaction memory pool, replay and drift detection.
//!
//! Block semantics live in the kernel. This crate decides what reaches
//! it and what gets written to disk afterwards.

pub mod proto_types;
pub mod store;
pub mod blockchain;
pub mod mempool;
pub mod replay;
pub mod drift;
pub mod telemetry;
