//! The node's storage facade
//!
//! A [`Storage`] holds one environment per backend, all rooted at the same
//! data directory and sharing one shutdown signal. Environments open lazily
//! on first use.

use crate::btree::BTreeBackend;
use crate::config::DbConfig;
use crate::db::{BTreeDb, LsmDb, SqlDb};
use crate::env::Environment;
use crate::lsm::LsmBackend;
use crate::sql::SqlBackend;
use chaindb_core::{OpenMode, Result, ShutdownSignal};
use tracing::{info, warn};

/// Every storage environment of one node
#[derive(Debug, Clone)]
pub struct Storage {
    config: DbConfig,
    shutdown: ShutdownSignal,
    btree: Environment<BTreeBackend>,
    lsm: Environment<LsmBackend>,
    sql: Environment<SqlBackend>,
}

impl Storage {
    pub fn new(config: DbConfig) -> Self {
        Self::with_shutdown(config, ShutdownSignal::new())
    }

    /// Storage driven by an existing shutdown signal
    pub fn with_shutdown(config: DbConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            btree: Environment::new(config.clone(), shutdown.clone()),
            lsm: Environment::new(config.clone(), shutdown.clone()),
            sql: Environment::new(config.clone(), shutdown.clone()),
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn btree(&self) -> &Environment<BTreeBackend> {
        &self.btree
    }

    pub fn lsm(&self) -> &Environment<LsmBackend> {
        &self.lsm
    }

    pub fn sql(&self) -> &Environment<SqlBackend> {
        &self.sql
    }

    /// Open a B-tree file with a mode string such as `"r"` or `"cr+"`
    pub fn open_btree(&self, name: &str, mode: &str) -> Result<BTreeDb> {
        self.btree.create(name, mode.parse::<OpenMode>()?)
    }

    /// Open an LSM store with a mode string
    pub fn open_lsm(&self, name: &str, mode: &str) -> Result<LsmDb> {
        self.lsm.create(name, mode.parse::<OpenMode>()?)
    }

    /// Open a relational file with a mode string
    pub fn open_sql(&self, name: &str, mode: &str) -> Result<SqlDb> {
        self.sql.create(name, mode.parse::<OpenMode>()?)
    }

    /// Stop the node's storage: signal shutdown, flush what is idle and
    /// close every environment. Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.trigger();

        let mut first_error = None;
        let results = [
            ("btree", self.btree.shutdown()),
            ("lsm", self.lsm.shutdown()),
            ("relational", self.sql.shutdown()),
        ];
        for (backend, result) in results {
            if let Err(e) = result {
                warn!(backend, error = %e, "failed to shut down environment");
                first_error.get_or_insert(e);
            }
        }
        info!(root = %self.config.data_dir.display(), "storage shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
