//! Error types shared by every chaindb backend.

use crate::types::BackendKind;
use std::io;
use thiserror::Error;

/// The main error type for chaindb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The physical environment could not be initialized. Fatal for the backend.
    #[error("environment initialization failed: {0}")]
    EnvironmentInit(String),

    /// Refused because the process is shutting down.
    #[error("operation refused: shutdown in progress")]
    ShuttingDown,

    /// A file handle could not be opened within the retry budget.
    #[error("cannot open {name} after {attempts} attempt(s): {reason}")]
    HandleOpen {
        /// Logical file name.
        name: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error reported by the last attempt.
        reason: String,
    },

    /// Begin while a transaction is active, or commit/abort without one.
    #[error("transaction state violation: {0}")]
    TransactionState(String),

    /// Iterator exhaustion.
    #[error("not found")]
    NotFound,

    /// Structural damage detected by a checksum, verify or salvage pass.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A record frame ends before its declared length.
    #[error("truncated record: {0}")]
    Truncated(String),

    /// Maintenance attempted on a file in use, or use count driven negative.
    #[error("use count violation on {name}: count is {count}")]
    UseCount {
        /// Logical file name.
        name: String,
        /// The offending count.
        count: i64,
    },

    /// The backend lacks the requested capability.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Backend that refused.
        backend: BackendKind,
        /// Name of the refused operation.
        operation: &'static str,
    },

    /// Write attempted through a read-only handle.
    #[error("{0} is opened read-only")]
    ReadOnly(String),

    /// A no-overwrite insert hit an existing key.
    #[error("key already exists")]
    KeyExists,

    /// Caller supplied an unusable key, value or name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error surfaced by an embedded engine.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Coarse classification of [`Error`], stable across variants that carry detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::EnvironmentInit`].
    EnvironmentInit,
    /// See [`Error::ShuttingDown`].
    ShuttingDown,
    /// See [`Error::HandleOpen`].
    HandleOpen,
    /// See [`Error::TransactionState`].
    TransactionState,
    /// See [`Error::NotFound`].
    NotFound,
    /// Checksum, verify, salvage or truncation failures.
    Corruption,
    /// See [`Error::UseCount`].
    UseCount,
    /// See [`Error::Unsupported`].
    Unsupported,
    /// See [`Error::ReadOnly`].
    ReadOnly,
    /// See [`Error::KeyExists`].
    KeyExists,
    /// See [`Error::InvalidInput`].
    InvalidInput,
    /// I/O, serialization and engine failures.
    Io,
}

impl Error {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EnvironmentInit(_) => ErrorKind::EnvironmentInit,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
            Error::HandleOpen { .. } => ErrorKind::HandleOpen,
            Error::TransactionState(_) => ErrorKind::TransactionState,
            Error::NotFound => ErrorKind::NotFound,
            Error::Corruption(_) | Error::Truncated(_) => ErrorKind::Corruption,
            Error::UseCount { .. } => ErrorKind::UseCount,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::ReadOnly(_) => ErrorKind::ReadOnly,
            Error::KeyExists => ErrorKind::KeyExists,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Serialization(_) | Error::Backend(_) => ErrorKind::Io,
        }
    }

    /// True for damage a reader may stop at without failing the whole pass.
    pub fn is_torn_write(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::Truncated(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for chaindb operations.
pub type Result<T> = std::result::Result<T, Error>;
