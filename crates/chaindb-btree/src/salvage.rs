//! Salvage dump of damaged page files
//!
//! The dump is plain text:
//!
//! ```text
//! VERSION=3
//! format=bytevalue
//! type=btree
//! HEADER=END
//!  <hex key>
//!  <hex value>
//! DATA=END
//! ```

use crate::page::{EntryReader, PageHeader, HEADER_LEN};
use chaindb_core::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Last line of the dump header
pub const HEADER_END: &str = "HEADER=END";
/// Last line of the dump
pub const DATA_END: &str = "DATA=END";

/// Dump every record that can still be read from the file at `path`.
///
/// A normal pass needs a valid header and stops at the first record that
/// is damaged or out of order. An aggressive pass ignores the header and
/// the checksum and keeps every record it can decode.
pub fn salvage_file(path: &Path, aggressive: bool) -> Result<String> {
    let data = fs::read(path)?;

    let header = match PageHeader::decode(&data) {
        Ok(header) => Some(header),
        Err(e) if aggressive => {
            warn!(path = %path.display(), error = %e, "salvaging past a damaged header");
            None
        }
        Err(e) => {
            return Err(Error::Corruption(format!(
                "cannot salvage {}: {}",
                path.display(),
                e
            )))
        }
    };

    // Leave the checksum out of the record area when it matches
    let body = if data.len() >= HEADER_LEN + 4 {
        let (body, crc) = data.split_at(data.len() - 4);
        if crc32fast::hash(body) == u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) {
            body
        } else {
            &data[..]
        }
    } else {
        &data[..]
    };

    let mut out = String::from("VERSION=3\nformat=bytevalue\ntype=btree\n");
    out.push_str(HEADER_END);
    out.push('\n');

    let limit = match (aggressive, header) {
        (false, Some(header)) => header.count,
        _ => u64::MAX,
    };

    let mut last: Option<&[u8]> = None;
    let mut salvaged = 0u64;
    for (key, value) in EntryReader::new(body) {
        if salvaged >= limit {
            break;
        }
        if !aggressive && last.is_some_and(|prev| prev >= key) {
            break;
        }
        last = Some(key);
        // Writing to a String cannot fail
        let _ = writeln!(out, " {}", hex::encode(key));
        let _ = writeln!(out, " {}", hex::encode(value));
        salvaged += 1;
    }

    out.push_str(DATA_END);
    out.push('\n');
    Ok(out)
}
