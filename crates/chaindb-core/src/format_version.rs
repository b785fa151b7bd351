//! File format versions and magic numbers.
//!
//! Every on-disk structure starts (or ends, for SSTables) with a magic
//! number and a format version so that a reader can refuse files it does
//! not understand instead of misreading them.

/// B-tree page file format version
pub const PAGE_FILE_FORMAT_VERSION: u16 = 1;

/// SSTable format version
pub const SSTABLE_FORMAT_VERSION: u16 = 2;

/// WAL segment format version
pub const WAL_FORMAT_VERSION: u16 = 2;

/// Manifest format version
pub const MANIFEST_FORMAT_VERSION: u16 = 2;

/// Magic numbers for file validation
pub mod magic {
    /// B-tree page file magic: "CDBT"
    pub const PAGE_FILE: u32 = 0x4344_4254;

    /// SSTable magic: "CDSS"
    pub const SSTABLE: u32 = 0x4344_5353;

    /// WAL segment magic: "CDWL"
    pub const WAL: u32 = 0x4344_574C;

    /// Manifest magic: "CDMF"
    pub const MANIFEST: u32 = 0x4344_4D46;
}

/// Version compatibility information
pub struct FormatVersion {
    /// Current version of this format
    pub current: u16,
    /// Minimum supported version for reading
    pub min_read: u16,
}

impl FormatVersion {
    /// Check if a version can be read
    pub fn can_read(&self, version: u16) -> bool {
        version >= self.min_read && version <= self.current
    }
}

/// B-tree page file format version info
pub fn page_file_version() -> FormatVersion {
    FormatVersion {
        current: PAGE_FILE_FORMAT_VERSION,
        min_read: 1,
    }
}

/// SSTable format version info
pub fn sstable_version() -> FormatVersion {
    FormatVersion {
        current: SSTABLE_FORMAT_VERSION,
        min_read: 2,
    }
}

/// WAL format version info
pub fn wal_version() -> FormatVersion {
    FormatVersion {
        current: WAL_FORMAT_VERSION,
        min_read: 2,
    }
}

/// Manifest format version info
pub fn manifest_version() -> FormatVersion {
    FormatVersion {
        current: MANIFEST_FORMAT_VERSION,
        min_read: 2,
    }
}
