//! Recoverable error types.
//!
//! Invariant violations are not represented here: they panic.

use thiserror::Error;

use crate::domain::UInt160;

/// Failure to decode a durable value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("protobuf decode error: {0}")]
    Decode(String),
    #[error("invalid length for {field}: expected {expected}, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: u64 },
    #[error("stored value is not a {0}")]
    UnexpectedShape(&'static str),
}

impl From<prost::DecodeError> for CodecError {
    fn from(err: prost::DecodeError) -> Self {
        CodecError::Decode(err.to_string())
    }
}

/// Errors from the store or from values read out of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupted value under key {key}: {source}")]
    Corrupted {
        key: String,
        #[source]
        source: CodecError,
    },
}

/// Errors surfaced to the calling contract execution. Never fatal to the node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("method {method} not found on {module}")]
    MethodNotFound { module: &'static str, method: String },
    #[error("{0} is not a native module")]
    NotNative(UInt160),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
