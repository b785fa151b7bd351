//! # chaindb
//!
//! The persistence layer of a blockchain node: one key/value contract over
//! three storage engines.
//!
//! - **B-tree**: transactional page files sharing a write-ahead log, with
//!   positioned cursors, checkpoints, verify and salvage
//! - **LSM**: log-structured stores with atomic write batches and forward
//!   iterators
//! - **Relational**: SQLite files used as plain key/value tables, without
//!   transactions or iteration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chaindb::{DbConfig, KeyValueStore, RecordStore, Storage};
//!
//! fn main() -> chaindb::Result<()> {
//!     let storage = Storage::new(DbConfig::new("./data"));
//!
//!     let wallet = storage.open_btree("wallet.dat", "cr+")?;
//!     assert_eq!(wallet.read_version()?, Some(chaindb::CLIENT_VERSION));
//!
//!     wallet.begin()?;
//!     wallet.write_record(&("name", 1u32), &"alice".to_string(), true)?;
//!     wallet.commit()?;
//!
//!     for record in wallet.iter()? {
//!         let (key, value) = record?;
//!         println!("{:?} = {:?}", key, value);
//!     }
//!
//!     drop(wallet);
//!     storage.shutdown()
//! }
//! ```
//!
//! ## Maintenance
//!
//! Environments run maintenance on files nobody holds: [`Environment::flush`]
//! detaches an idle file from the log, [`Environment::rewrite`] compacts a
//! file into a fresh copy, and [`Environment::verify`] and
//! [`Environment::salvage`] deal with damaged files.

pub mod backend;
pub mod btree;
pub mod config;
pub mod db;
pub mod env;
pub mod iter;
pub mod logging;
pub mod lsm;
pub mod maintenance;
mod registry;
pub mod sql;
pub mod storage;
mod txn;
pub mod validate;

pub use backend::{Backend, FileHandle};
pub use btree::BTreeBackend;
pub use config::DbConfig;
pub use db::{BTreeDb, Db, KeyValueStore, LsmDb, RecordStore, SqlDb};
pub use env::Environment;
pub use iter::DbIterator;
pub use logging::{LogConfig, LogFormat, LogOutput, LogRotation};
pub use lsm::{LsmBackend, REPLACED_SUFFIX};
pub use maintenance::{parse_dump, FlushOutcome, VerifyOutcome, REWRITE_SUFFIX};
pub use sql::{SqlBackend, SqlFile};
pub use storage::Storage;

pub use chaindb_btree::CursorOp;
pub use chaindb_core::{
    decode_version, encode_version, BackendKind, Error, ErrorKind, OpenMode, Result,
    ShutdownSignal, CLIENT_VERSION, VERSION_KEY,
};
pub use chaindb_lsm::BatchLookup;
pub use chaindb_wal::SyncMode;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
