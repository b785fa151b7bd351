//! Backend identifiers, open modes and the reserved version record.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The closed set of physical engines behind the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Transactional B-tree files sharing one write-ahead log.
    BTree,
    /// Log-structured merge store with atomic write batches.
    Lsm,
    /// SQLite table used as plain key/value storage.
    Relational,
}

impl BackendKind {
    /// Lower-case name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::BTree => "btree",
            BackendKind::Lsm => "lsm",
            BackendKind::Relational => "relational",
        }
    }

    /// Whether begin/commit/abort are meaningful for this backend.
    pub fn supports_transactions(&self) -> bool {
        !matches!(self, BackendKind::Relational)
    }

    /// Whether the backend can hand out ordered iterators.
    pub fn supports_iteration(&self) -> bool {
        !matches!(self, BackendKind::Relational)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a logical file is opened.
///
/// Parsed from the node's mode strings: a file is writable when the mode
/// contains `+` or `w`, and is created when missing when it contains `c`.
/// `"r"` is read-only, `"r+"` read-write and `"cr+"` read-write-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    /// Writes through this handle are refused.
    pub read_only: bool,
    /// Create the file when it does not exist.
    pub create: bool,
}

impl OpenMode {
    /// `"r"`
    pub const READ: OpenMode = OpenMode {
        read_only: true,
        create: false,
    };
    /// `"r+"`
    pub const READ_WRITE: OpenMode = OpenMode {
        read_only: false,
        create: false,
    };
    /// `"cr+"`
    pub const CREATE: OpenMode = OpenMode {
        read_only: false,
        create: true,
    };
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::READ_WRITE
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self> {
        if mode.is_empty() || !mode.chars().all(|c| matches!(c, 'r' | 'w' | 'c' | '+')) {
            return Err(Error::InvalidInput(format!("bad open mode {:?}", mode)));
        }
        Ok(OpenMode {
            read_only: !mode.contains('+') && !mode.contains('w'),
            create: mode.contains('c'),
        })
    }
}

/// Key of the record every file carries from creation on.
pub const VERSION_KEY: &[u8] = b"version";

/// Version stamped into new files and into rewritten copies.
pub const CLIENT_VERSION: i32 = 1_050_100;

/// Encodes a version value as stored under [`VERSION_KEY`].
pub fn encode_version(version: i32) -> [u8; 4] {
    version.to_le_bytes()
}

/// Decodes the value stored under [`VERSION_KEY`].
pub fn decode_version(raw: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = raw.try_into().map_err(|_| {
        Error::Serialization(format!("version record has {} bytes, expected 4", raw.len()))
    })?;
    Ok(i32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parsing() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::READ);
        assert_eq!("r+".parse::<OpenMode>().unwrap(), OpenMode::READ_WRITE);
        assert_eq!("cr+".parse::<OpenMode>().unwrap(), OpenMode::CREATE);

        let w: OpenMode = "w".parse().unwrap();
        assert!(!w.read_only);
        assert!(!w.create);

        let cr: OpenMode = "cr".parse().unwrap();
        assert!(cr.read_only);
        assert!(cr.create);

        assert!("".parse::<OpenMode>().is_err());
        assert!("rx".parse::<OpenMode>().is_err());
    }

    #[test]
    fn test_version_codec() {
        let raw = encode_version(CLIENT_VERSION);
        assert_eq!(decode_version(&raw).unwrap(), CLIENT_VERSION);
        assert_eq!(decode_version(&[1, 0, 0, 0]).unwrap(), 1);
        assert!(decode_version(b"abc").is_err());
    }

    #[test]
    fn test_backend_capabilities() {
        assert!(BackendKind::BTree.supports_transactions());
        assert!(BackendKind::Lsm.supports_iteration());
        assert!(!BackendKind::Relational.supports_transactions());
        assert!(!BackendKind::Relational.supports_iteration());
    }
}
