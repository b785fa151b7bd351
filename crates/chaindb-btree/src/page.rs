//! Page file format
//!
//! A B-tree file is persisted as one sorted page image:
//!
//! ```text
//! [magic u32][version u16][flags u8][lsn u64][count u64]
//! count x [key_len u32][key][value_len u32][value]
//! [crc32 u32]
//! ```
//!
//! All integers are little endian and the CRC covers every byte before it.
//! `lsn` is the last log record for this file that the image includes.
//! Images are replaced whole through a temporary file and a rename.

use chaindb_core::format_version::{magic, page_file_version, PAGE_FILE_FORMAT_VERSION};
use chaindb_core::{Error, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Bytes before the first entry
pub const HEADER_LEN: usize = 4 + 2 + 1 + 8 + 8;

const FLAG_DETACHED: u8 = 0x01;

/// Decoded page file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub version: u16,
    /// The file no longer depends on the log
    pub detached: bool,
    pub lsn: u64,
    pub count: u64,
}

impl PageHeader {
    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Truncated(format!(
                "page header needs {} bytes, found {}",
                HEADER_LEN,
                data.len()
            )));
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != magic::PAGE_FILE {
            return Err(Error::Corruption("invalid page file magic".into()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if !page_file_version().can_read(version) {
            return Err(Error::Corruption(format!(
                "unsupported page file version {}",
                version
            )));
        }
        Ok(Self {
            version,
            detached: data[6] & FLAG_DETACHED != 0,
            lsn: read_u64(&data[7..15]),
            count: read_u64(&data[15..23]),
        })
    }
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(raw)
}

/// Encode a full page image
pub fn encode(entries: &BTreeMap<Vec<u8>, Vec<u8>>, lsn: u64, detached: bool) -> Vec<u8> {
    let body: usize = entries.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body + 4);

    buf.extend_from_slice(&magic::PAGE_FILE.to_le_bytes());
    buf.extend_from_slice(&PAGE_FILE_FORMAT_VERSION.to_le_bytes());
    buf.push(if detached { FLAG_DETACHED } else { 0 });
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());

    for (key, value) in entries {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Walks the entry area of a page image without trusting the header count
pub(crate) struct EntryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> EntryReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: HEADER_LEN.min(data.len()),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    fn field(&mut self) -> Option<&'a [u8]> {
        let start = self.offset.checked_add(4)?;
        let len_bytes = self.data.get(self.offset..start)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let end = start.checked_add(len as usize)?;
        let field = self.data.get(start..end)?;
        self.offset = end;
        Some(field)
    }
}

impl<'a> Iterator for EntryReader<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let saved = self.offset;
        match (self.field(), self.field()) {
            (Some(key), Some(value)) => Some((key, value)),
            _ => {
                self.offset = saved;
                None
            }
        }
    }
}

/// Decode and check a full page image
pub fn decode(data: &[u8]) -> Result<(PageHeader, BTreeMap<Vec<u8>, Vec<u8>>)> {
    let header = PageHeader::decode(data)?;
    if data.len() < HEADER_LEN + 4 {
        return Err(Error::Truncated("page file has no checksum".into()));
    }

    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(body) != stored {
        return Err(Error::Corruption("page file checksum mismatch".into()));
    }

    let mut entries = BTreeMap::new();
    let mut reader = EntryReader::new(body);
    let mut last: Option<&[u8]> = None;
    for (key, value) in reader.by_ref() {
        if last.is_some_and(|prev| prev >= key) {
            return Err(Error::Corruption("page file keys out of order".into()));
        }
        last = Some(key);
        entries.insert(key.to_vec(), value.to_vec());
    }

    if reader.offset() != body.len() {
        return Err(Error::Corruption(format!(
            "{} undecodable bytes after the last entry",
            body.len() - reader.offset()
        )));
    }
    if entries.len() as u64 != header.count {
        return Err(Error::Corruption(format!(
            "header counts {} entries, found {}",
            header.count,
            entries.len()
        )));
    }

    Ok((header, entries))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replace the page file at `path` with a new image
pub fn write_page_file(
    path: &Path,
    entries: &BTreeMap<Vec<u8>, Vec<u8>>,
    lsn: u64,
    detached: bool,
) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&encode(entries, lsn, detached))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and check the page file at `path`
pub fn read_page_file(path: &Path) -> Result<(PageHeader, BTreeMap<Vec<u8>, Vec<u8>>)> {
    let data = fs::read(path)?;
    decode(&data)
}

/// Whether `path` is a regular file starting with the page file magic
pub fn is_page_file(path: &Path) -> bool {
    let mut buf = [0u8; 4];
    match File::open(path).and_then(|mut f| f.read_exact(&mut buf)) {
        Ok(()) => u32::from_le_bytes(buf) == magic::PAGE_FILE,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut entries = BTreeMap::new();
        entries.insert(b"alpha".to_vec(), b"1".to_vec());
        entries.insert(b"beta".to_vec(), Vec::new());
        entries.insert(b"gamma".to_vec(), vec![0u8; 300]);
        entries
    }

    #[test]
    fn test_decode_encoded_image() {
        let data = encode(&sample(), 42, false);
        let (header, entries) = decode(&data).unwrap();
        assert_eq!(header.lsn, 42);
        assert_eq!(header.count, 3);
        assert!(!header.detached);
        assert_eq!(entries, sample());
    }

    #[test]
    fn test_checksum_detects_flip() {
        let mut data = encode(&sample(), 1, true);
        data[HEADER_LEN + 5] ^= 0xFF;
        assert!(matches!(decode(&data), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_truncated_header() {
        let data = encode(&sample(), 1, false);
        assert!(matches!(
            decode(&data[..10]),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn test_entry_reader_stops_at_damage() {
        let data = encode(&sample(), 1, false);
        // Cut in the middle of the last value
        let cut = &data[..data.len() - 100];
        let found: Vec<_> = EntryReader::new(cut).map(|(k, _)| k.to_vec()).collect();
        assert_eq!(found, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn test_write_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");

        write_page_file(&path, &sample(), 5, false).unwrap();
        assert!(is_page_file(&path));

        let mut smaller = BTreeMap::new();
        smaller.insert(b"k".to_vec(), b"v".to_vec());
        write_page_file(&path, &smaller, 9, true).unwrap();

        let (header, entries) = read_page_file(&path).unwrap();
        assert_eq!(header.lsn, 9);
        assert!(header.detached);
        assert_eq!(entries, smaller);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_is_page_file_rejects_other_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.log");
        fs::write(&path, b"log line\n").unwrap();
        assert!(!is_page_file(&path));
        assert!(!is_page_file(&dir.path().join("missing")));
    }
}
