//! Relational backend: a SQLite file per instance used as a key/value table
//!
//! There are no transactions and no iteration here; callers treat both as
//! missing capabilities and use direct key lookups.

use crate::backend::{Backend, FileHandle};
use crate::config::DbConfig;
use crate::iter::DbIterator;
use chaindb_core::{BackendKind, Error, OpenMode, Result};
use chaindb_lsm::BatchLookup;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::convert::Infallible;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS key_value (key BLOB PRIMARY KEY, value BLOB NOT NULL)";

fn sql_err(err: rusqlite::Error) -> Error {
    Error::Backend(err.to_string())
}

fn unsupported(operation: &'static str) -> Error {
    Error::Unsupported {
        backend: BackendKind::Relational,
        operation,
    }
}

/// Open connection to one SQLite file
#[derive(Clone)]
pub struct SqlFile {
    conn: Arc<Mutex<Connection>>,
}

impl SqlFile {
    fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.execute(CREATE_TABLE, []).map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl FileHandle for SqlFile {
    type Pending = Infallible;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM key_value WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)
    }

    fn put(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        let conn = self.conn.lock();
        if overwrite {
            conn.execute(
                "INSERT OR REPLACE INTO key_value (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(sql_err)?;
        } else {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO key_value (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )
                .map_err(sql_err)?;
            if inserted == 0 {
                return Err(Error::KeyExists);
            }
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM key_value WHERE key = ?1", params![key])
            .map_err(sql_err)?;
        Ok(())
    }

    fn iter(&self, _lock: Arc<Mutex<()>>) -> Result<DbIterator> {
        Err(unsupported("iteration"))
    }

    fn begin(&self) -> Result<Infallible> {
        Err(unsupported("transactions"))
    }

    fn pending_get(&self, pending: &Infallible, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        match *pending {}
    }

    fn pending_put(
        &self,
        pending: &mut Infallible,
        _key: &[u8],
        _value: &[u8],
        _overwrite: bool,
    ) -> Result<()> {
        match *pending {}
    }

    fn pending_delete(&self, pending: &mut Infallible, _key: &[u8]) -> Result<()> {
        match *pending {}
    }

    fn scan_pending(&self, pending: &Infallible, _key: &[u8]) -> Result<BatchLookup> {
        match *pending {}
    }

    fn commit(&self, pending: Infallible) -> Result<()> {
        match pending {}
    }
}

/// Environment of SQLite files under the data directory
pub struct SqlBackend {
    root: PathBuf,
}

impl SqlBackend {
    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Backend for SqlBackend {
    const KIND: BackendKind = BackendKind::Relational;

    type Handle = SqlFile;
    type Options = Vec<String>;

    /// Instance files to bootstrap
    fn options(config: &DbConfig) -> Vec<String> {
        config.sql_instances.clone()
    }

    fn open(config: &DbConfig, instances: &Vec<String>) -> Result<Self> {
        let root = config.data_dir.clone();
        fs::create_dir_all(&root)?;
        for instance in instances {
            SqlFile::open(&root.join(instance))?;
            debug!(instance = %instance, "prepared SQLite instance");
        }
        Ok(Self { root })
    }

    fn open_file(&self, name: &str, mode: OpenMode) -> Result<SqlFile> {
        let path = self.path(name);
        if !mode.create && !path.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        SqlFile::open(&path)
    }

    fn close_file(&self, _name: &str, handle: SqlFile) -> Result<()> {
        drop(handle);
        Ok(())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn checkpoint(&self, _open: &[SqlFile], _kbytes: u64, _minutes: u64) -> Result<bool> {
        Ok(false)
    }

    fn verify(&self, name: &str) -> Result<()> {
        let conn = Connection::open_with_flags(self.path(name), OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(sql_err)?;
        let verdict: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(sql_err)?;
        if verdict != "ok" {
            return Err(Error::Corruption(format!("{}: {}", name, verdict)));
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.path(from), self.path(to))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
