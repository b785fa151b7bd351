//! # chaindb core
//!
//! Types shared by every chaindb backend: the error taxonomy, backend
//! identifiers, open modes, the reserved version record, the shutdown
//! signal and on-disk format versions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format_version;
pub mod shutdown;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use shutdown::ShutdownSignal;
pub use types::{
    decode_version, encode_version, BackendKind, OpenMode, CLIENT_VERSION, VERSION_KEY,
};
