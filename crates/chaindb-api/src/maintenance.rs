//! Maintenance operations on closed files
//!
//! Everything here runs under the environment lock and refuses files that
//! are still acquired, except `rewrite`, which waits for the file to go
//! idle first. A failed rewrite leaves the original file untouched.

use crate::backend::{Backend, FileHandle};
use crate::env::{EnvState, Environment};
use crate::validate::validate_file_name;
use chaindb_btree::{DATA_END, HEADER_END};
use chaindb_core::{encode_version, Error, OpenMode, Result, CLIENT_VERSION, VERSION_KEY};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Suffix of the temporary copy a rewrite builds
pub const REWRITE_SUFFIX: &str = ".rewrite";

/// Records copied per transaction during a rewrite
const REWRITE_CHUNK: usize = 10_000;

/// What `flush` did with one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Closed, checkpointed and no longer tracked
    Flushed,
    /// Skipped; still acquired this many times
    InUse(i64),
    /// The registry does not know the file
    Untracked,
}

/// Result of `verify`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The file verified cleanly
    Ok,
    /// Verification failed and the recovery callback succeeded
    RecoveredOk,
    /// Verification failed and so did recovery
    RecoveredFail,
}

fn require_idle<B: Backend>(state: &EnvState<B>, name: &str) -> Result<()> {
    let count = state.registry.use_count(name);
    if count > 0 {
        return Err(Error::UseCount {
            name: name.to_string(),
            count,
        });
    }
    Ok(())
}

impl<B: Backend> Environment<B> {
    /// Checkpoint when enough log was written or enough time passed;
    /// `0, 0` forces one. Returns whether it ran.
    pub fn checkpoint(&self, kbytes: u64, minutes: u64) -> Result<bool> {
        let mut guard = self.lock();
        let state = &mut *guard;
        self.open_locked(state)?;
        state
            .engine()?
            .checkpoint(&state.registry.handles(), kbytes, minutes)
    }

    /// Close, checkpoint and stop tracking `name` if nothing holds it.
    ///
    /// Once the engine is gone a file the registry still tracks is
    /// `Error::ShuttingDown`.
    pub fn flush(&self, name: &str) -> Result<FlushOutcome> {
        let mut guard = self.lock();
        if guard.engine.is_none() {
            if guard.registry.exists(name) {
                return Err(Error::ShuttingDown);
            }
            return Ok(FlushOutcome::Untracked);
        }
        self.flush_locked(&mut guard, name)
    }

    fn resets_lsn(&self, name: &str) -> bool {
        let config = self.config();
        !config.mock && (config.detach_db || config.chain_file.as_deref() != Some(name))
    }

    pub(crate) fn flush_locked(&self, state: &mut EnvState<B>, name: &str) -> Result<FlushOutcome> {
        if !state.registry.exists(name) {
            return Ok(FlushOutcome::Untracked);
        }
        let count = state.registry.use_count(name);
        if count > 0 {
            debug!(backend = %B::KIND, file = name, count, "skipping flush of file in use");
            return Ok(FlushOutcome::InUse(count));
        }

        state.close_handle(name)?;
        let engine = state.engine()?;
        engine.checkpoint(&state.registry.handles(), 0, 0)?;
        if self.resets_lsn(name) {
            engine.lsn_reset(name)?;
        }
        state.registry.erase(name);
        debug!(backend = %B::KIND, file = name, "flushed");
        Ok(FlushOutcome::Flushed)
    }

    /// Flush every tracked file that is not in use.
    ///
    /// When `shutting_down` and no file is left tracked, the log is
    /// archived and the environment closed for good.
    pub fn flush_all(&self, shutting_down: bool) -> Result<Vec<(String, FlushOutcome)>> {
        let mut guard = self.lock();
        self.flush_all_locked(&mut guard, shutting_down)
    }

    pub(crate) fn flush_all_locked(
        &self,
        state: &mut EnvState<B>,
        shutting_down: bool,
    ) -> Result<Vec<(String, FlushOutcome)>> {
        if state.engine.is_none() {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        for name in state.registry.names() {
            let outcome = self.flush_locked(state, &name)?;
            outcomes.push((name, outcome));
        }

        if shutting_down && state.registry.is_empty() {
            if let Some(engine) = state.engine.take() {
                engine.archive_logs()?;
                engine.close()?;
                info!(backend = %B::KIND, root = %self.root().display(), "closed environment");
            }
            state.shut_down = true;
        }
        Ok(outcomes)
    }

    /// Check the structure of an idle file.
    ///
    /// On failure `recover` runs without the environment lock held, so it
    /// may use this environment; its verdict picks the outcome.
    pub fn verify<F>(&self, name: &str, recover: F) -> Result<VerifyOutcome>
    where
        F: FnOnce(&Self, &str) -> bool,
    {
        validate_file_name(name)?;
        let verdict = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.open_locked(state)?;
            require_idle(state, name)?;
            state.close_handle(name)?;
            state.engine()?.verify(name)
        };

        match verdict {
            Ok(()) => Ok(VerifyOutcome::Ok),
            Err(e) => {
                warn!(backend = %B::KIND, file = name, error = %e, "verification failed, attempting recovery");
                if recover(self, name) {
                    info!(backend = %B::KIND, file = name, "recovered");
                    Ok(VerifyOutcome::RecoveredOk)
                } else {
                    warn!(backend = %B::KIND, file = name, "recovery failed");
                    Ok(VerifyOutcome::RecoveredFail)
                }
            }
        }
    }

    /// Every record that can still be read from an idle, possibly damaged
    /// file
    pub fn salvage(&self, name: &str, aggressive: bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        validate_file_name(name)?;
        let dump = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.open_locked(state)?;
            require_idle(state, name)?;
            state.close_handle(name)?;
            state.engine()?.salvage(name, aggressive)
        };

        let dump = dump.map_err(|e| match e {
            Error::Unsupported { .. } | Error::Corruption(_) => e,
            other => Error::Corruption(format!("salvage of {} failed: {}", name, other)),
        })?;
        let records = parse_dump(&dump)?;
        info!(backend = %B::KIND, file = name, records = records.len(), aggressive, "salvaged");
        Ok(records)
    }

    /// Compact `name` into a fresh copy, dropping keys that start with
    /// `skip_prefix` and stamping the current version.
    ///
    /// Waits for the file to go idle, polling at the configured interval
    /// up to the configured limit; the shutdown signal cancels the wait.
    pub fn rewrite(&self, name: &str, skip_prefix: Option<&[u8]>) -> Result<()> {
        if !B::KIND.supports_iteration() {
            return Err(Error::Unsupported {
                backend: B::KIND,
                operation: "rewrite",
            });
        }
        validate_file_name(name)?;

        let config = self.config();
        for poll in 0..config.rewrite_max_polls {
            if self.shutdown_signal().is_triggered() {
                return Err(Error::ShuttingDown);
            }
            {
                let mut guard = self.lock();
                let state = &mut *guard;
                self.open_locked(state)?;
                if state.registry.use_count(name) == 0 {
                    return self.rewrite_locked(state, name, skip_prefix);
                }
            }
            if poll == 0 {
                debug!(backend = %B::KIND, file = name, "waiting for file to go idle before rewrite");
            }
            thread::sleep(config.rewrite_poll_interval);
        }

        Err(Error::UseCount {
            name: name.to_string(),
            count: self.use_count(name),
        })
    }

    fn rewrite_locked(
        &self,
        state: &mut EnvState<B>,
        name: &str,
        skip_prefix: Option<&[u8]>,
    ) -> Result<()> {
        info!(backend = %B::KIND, file = name, "rewriting");
        state.close_handle(name)?;
        state.registry.erase(name);
        let engine = state.engine()?;
        engine.checkpoint(&state.registry.handles(), 0, 0)?;
        engine.lsn_reset(name)?;

        let temp = format!("{}{}", name, REWRITE_SUFFIX);
        if engine.file_exists(&temp) {
            engine.remove(&temp)?;
        }

        let copied = copy_records(engine, name, &temp, skip_prefix)
            .and_then(|copied| engine.rename(&temp, name).map(|()| copied));
        match copied {
            Ok(copied) => {
                info!(backend = %B::KIND, file = name, records = copied, "rewrite finished");
                Ok(())
            }
            Err(e) if !engine.file_exists(name) => {
                // The copy is the only one left
                error!(
                    backend = %B::KIND,
                    file = name,
                    temp = %temp,
                    error = %e,
                    "rewrite failed after the original was moved, keeping the copy"
                );
                Err(e)
            }
            Err(e) => {
                warn!(backend = %B::KIND, file = name, error = %e, "rewrite failed, keeping original");
                if engine.file_exists(&temp) {
                    if let Err(e) = engine.remove(&temp) {
                        warn!(backend = %B::KIND, file = %temp, error = %e, "failed to remove partial rewrite");
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete an idle file
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_file_name(name)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        self.open_locked(state)?;
        require_idle(state, name)?;
        state.close_handle(name)?;
        state.registry.erase(name);
        state.engine()?.remove(name)?;
        info!(backend = %B::KIND, file = name, "removed");
        Ok(())
    }

    /// Rename an idle file, replacing any idle file called `to`
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        validate_file_name(from)?;
        validate_file_name(to)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        self.open_locked(state)?;
        for name in [from, to] {
            require_idle(state, name)?;
            state.close_handle(name)?;
            state.registry.erase(name);
        }
        state.engine()?.rename(from, to)?;
        info!(backend = %B::KIND, from, to, "renamed");
        Ok(())
    }
}

/// Copy `name` into `temp`; returns the number of records written
fn copy_records<B: Backend>(
    engine: &B,
    name: &str,
    temp: &str,
    skip_prefix: Option<&[u8]>,
) -> Result<usize> {
    let source = engine.open_file(name, OpenMode::READ)?;
    let dest = match engine.open_file(temp, OpenMode::CREATE) {
        Ok(dest) => dest,
        Err(e) => {
            let _ = engine.close_file(name, source);
            return Err(e);
        }
    };

    let copied = copy_into(&source, &dest, skip_prefix);
    let closed_source = engine.close_file(name, source);
    let closed_dest = engine.close_file(temp, dest);
    let copied = copied?;
    closed_source?;
    closed_dest?;
    Ok(copied)
}

fn copy_into<H: FileHandle>(source: &H, dest: &H, skip_prefix: Option<&[u8]>) -> Result<usize> {
    let version = encode_version(CLIENT_VERSION);
    let mut pending = dest.begin()?;
    let mut in_chunk = 0;
    let mut copied = 0;
    let mut saw_version = false;

    for record in source.iter(Arc::new(Mutex::new(())))? {
        let (key, value) = match record {
            Ok(record) => record,
            Err(e) => {
                H::abort(pending);
                return Err(e);
            }
        };
        if skip_prefix.is_some_and(|prefix| key.starts_with(prefix)) {
            continue;
        }
        let value = if key == VERSION_KEY {
            saw_version = true;
            &version[..]
        } else {
            &value[..]
        };
        if let Err(e) = dest.pending_put(&mut pending, &key, value, false) {
            H::abort(pending);
            return Err(e);
        }
        copied += 1;
        in_chunk += 1;
        if in_chunk == REWRITE_CHUNK {
            dest.commit(pending)?;
            pending = dest.begin()?;
            in_chunk = 0;
        }
    }

    if !saw_version {
        if let Err(e) = dest.pending_put(&mut pending, VERSION_KEY, &version, false) {
            H::abort(pending);
            return Err(e);
        }
        copied += 1;
    }
    dest.commit(pending)?;
    Ok(copied)
}

fn hex_decode(line: &str) -> Result<Vec<u8>> {
    hex::decode(line)
        .map_err(|e| Error::Corruption(format!("bad hex in salvage dump: {}: {:?}", e, line)))
}

/// Parse a salvage dump into key/value pairs.
///
/// Everything up to `HEADER=END` is header. Records follow as pairs of hex
/// lines, optionally indented, and the dump ends with `DATA=END`.
pub fn parse_dump(dump: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut lines = dump.lines().map(str::trim);
    if !lines.by_ref().any(|line| line == HEADER_END) {
        return Err(Error::Corruption("salvage dump has no header".into()));
    }

    let mut records = Vec::new();
    loop {
        let key = match lines.next() {
            Some(DATA_END) => return Ok(records),
            Some(key) => key,
            None => {
                return Err(Error::Corruption(
                    "unexpected end of salvage dump".into(),
                ))
            }
        };
        let value = match lines.next() {
            Some(DATA_END) | None => {
                return Err(Error::Corruption(
                    "salvage dump has a key without a value".into(),
                ))
            }
            Some(value) => value,
        };
        records.push((hex_decode(key)?, hex_decode(value)?));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dump() {
        let dump = "VERSION=3\nformat=bytevalue\ntype=btree\nHEADER=END\n 6b31\n 7631\n6b32\n7632\nDATA=END\n";
        let records = parse_dump(dump).unwrap();
        assert_eq!(
            records,
            vec![
                (b"k1".to_vec(), b"v1".to_vec()),
                (b"k2".to_vec(), b"v2".to_vec())
            ]
        );
    }

    #[test]
    fn test_parse_empty_dump() {
        assert!(parse_dump("HEADER=END\nDATA=END\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_dump_without_header() {
        assert!(matches!(
            parse_dump(" 6b31\n 7631\nDATA=END\n"),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_parse_dump_unbalanced() {
        assert!(matches!(
            parse_dump("HEADER=END\n 6b31\nDATA=END\n"),
            Err(Error::Corruption(_))
        ));
        assert!(matches!(
            parse_dump("HEADER=END\n 6b31\n 7631\n"),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_parse_dump_bad_hex() {
        assert!(matches!(
            parse_dump("HEADER=END\n zz\n 00\nDATA=END\n"),
            Err(Error::Corruption(_))
        ));
        assert!(matches!(
            parse_dump("HEADER=END\n abc\n 00\nDATA=END\n"),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert_eq!(hex_decode("").unwrap(), Vec::<u8>::new());
        // Sign prefixes are not hex digits
        assert!(matches!(hex_decode("+f"), Err(Error::Corruption(_))));
        assert!(matches!(
            parse_dump("HEADER=END\n+f+f\n+0\nDATA=END\n"),
            Err(Error::Corruption(_))
        ));
    }
}
