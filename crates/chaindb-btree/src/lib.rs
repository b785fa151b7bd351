//! # chaindb B-tree engine
//!
//! Transactional ordered key/value files sharing one write-ahead log.
//!
//! ```text
//! <root>/
//!   database/      shared log segments
//!   db.log         error log
//!   wallet.dat     page files, one per logical file
//!   blkindex.dat
//! ```
//!
//! Writes are logged before they are applied; a transaction is logged as
//! one group on commit. Checkpoints write every open file back and delete
//! the log segments no file depends on. A file can be detached from the log
//! (`lsn_reset`) so it can be copied, renamed or rewritten on its own.
//!
//! ## Example
//!
//! ```no_run
//! use chaindb_btree::{BTreeEnv, BTreeOptions, CursorOp};
//! use chaindb_core::OpenMode;
//!
//! # fn main() -> chaindb_core::Result<()> {
//! let env = BTreeEnv::open("data", BTreeOptions::default())?;
//! let file = env.open_file("wallet.dat", OpenMode::CREATE)?;
//!
//! let mut txn = file.begin()?;
//! txn.put(b"name", b"alice")?;
//! txn.commit(&file)?;
//!
//! let mut cursor = file.cursor()?;
//! while cursor.get(&CursorOp::Next)? {
//!     println!("{:?} = {:?}", cursor.key(), cursor.value());
//! }
//!
//! env.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod env;
pub mod file;
pub mod page;
pub mod salvage;
pub mod txn;

pub use cursor::{Cursor, CursorOp};
pub use env::{BTreeEnv, BTreeOptions, ERROR_LOG, LOG_DIR};
pub use file::BTreeFile;
pub use salvage::{DATA_END, HEADER_END};
pub use txn::{Txn, TxnState};
