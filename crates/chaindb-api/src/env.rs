//! Environment managers
//!
//! An [`Environment`] owns one backend's engine, its file handle registry
//! and the lock serializing both. Opening is lazy and idempotent; once an
//! environment has shut down it never opens again.
//!
//! Lock order: a file's transaction slot, the environment, a file's step
//! lock, then whatever the engine takes.

use crate::backend::Backend;
use crate::config::DbConfig;
use crate::db::Db;
use crate::registry::Registry;
use crate::validate::validate_file_name;
use chaindb_core::{BackendKind, Error, OpenMode, Result, ShutdownSignal};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub(crate) struct EnvState<B: Backend> {
    pub(crate) engine: Option<B>,
    pub(crate) shut_down: bool,
    pub(crate) registry: Registry<B::Handle>,
}

impl<B: Backend> EnvState<B> {
    pub(crate) fn engine(&self) -> Result<&B> {
        self.engine.as_ref().ok_or(Error::ShuttingDown)
    }

    /// Close and forget the cached handle of `name`, if any
    pub(crate) fn close_handle(&mut self, name: &str) -> Result<()> {
        if let Some(handle) = self.registry.take_handle(name) {
            self.engine()?.close_file(name, handle)?;
            debug!(backend = %B::KIND, file = name, "closed handle");
        }
        Ok(())
    }
}

struct EnvInner<B: Backend> {
    config: DbConfig,
    options: B::Options,
    shutdown: ShutdownSignal,
    state: Mutex<EnvState<B>>,
}

/// Manager of one backend's engine and open files
pub struct Environment<B: Backend> {
    inner: Arc<EnvInner<B>>,
}

impl<B: Backend> Clone for Environment<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> Environment<B> {
    /// An unopened environment; nothing touches the disk until first use
    pub fn new(config: DbConfig, shutdown: ShutdownSignal) -> Self {
        let options = B::options(&config);
        Self {
            inner: Arc::new(EnvInner {
                config,
                options,
                shutdown,
                state: Mutex::new(EnvState {
                    engine: None,
                    shut_down: false,
                    registry: Registry::new(),
                }),
            }),
        }
    }

    pub fn kind(&self) -> BackendKind {
        B::KIND
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.data_dir
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Engine tuning derived from the configuration
    pub fn options(&self) -> &B::Options {
        &self.inner.options
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().engine.is_some()
    }

    /// Open the engine unless it is open already
    pub fn open(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.open_locked(&mut state)
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, EnvState<B>> {
        self.inner.state.lock()
    }

    pub(crate) fn open_locked(&self, state: &mut EnvState<B>) -> Result<()> {
        if state.shut_down || self.inner.shutdown.is_triggered() {
            return Err(Error::ShuttingDown);
        }
        if state.engine.is_some() {
            return Ok(());
        }

        let root = &self.inner.config.data_dir;
        let engine = B::open(&self.inner.config, &self.inner.options).map_err(|e| {
            Error::EnvironmentInit(format!("{} environment at {}: {}", B::KIND, root.display(), e))
        })?;
        state.engine = Some(engine);
        info!(backend = %B::KIND, root = %root.display(), "opened environment");
        Ok(())
    }

    fn open_with_retry(&self, engine: &B, name: &str, mode: OpenMode) -> Result<B::Handle> {
        let attempts = self.inner.config.open_retries.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            if self.inner.shutdown.is_triggered() {
                return Err(Error::ShuttingDown);
            }
            match engine.open_file(name, mode) {
                Ok(handle) => {
                    debug!(backend = %B::KIND, file = name, attempt, "opened handle");
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(backend = %B::KIND, file = name, attempt, error = %e, "failed to open file");
                    reason = e.to_string();
                    if attempt < attempts {
                        thread::sleep(self.inner.config.open_retry_backoff);
                    }
                }
            }
        }
        Err(Error::HandleOpen {
            name: name.to_string(),
            attempts,
            reason,
        })
    }

    /// Acquire `name`, opening the environment and the file as needed.
    ///
    /// The use count goes up by one for every successful call and back
    /// down when the returned handle object is dropped. A file created
    /// here gets a version record before anything else is written.
    pub fn create(&self, name: &str, mode: OpenMode) -> Result<Db<B>> {
        validate_file_name(name)?;
        let shared = {
            let mut guard = self.inner.state.lock();
            self.open_locked(&mut guard)?;
            let state = &mut *guard;
            let shared = state.registry.acquire(name);
            if state.registry.handle(name).is_none() {
                let opened = state
                    .engine()
                    .and_then(|engine| self.open_with_retry(engine, name, mode));
                match opened {
                    Ok(handle) => state.registry.set_handle(name, handle),
                    Err(e) => {
                        if state.registry.dec_use_count(name)? == 0 {
                            state.registry.erase(name);
                        }
                        return Err(e);
                    }
                }
            }
            shared
        };

        let db = Db::new(self.clone(), name, mode.read_only, shared);
        if mode.create {
            db.ensure_version()?;
        }
        Ok(db)
    }

    /// The cached handle of an acquired file, reopening it after a close
    pub(crate) fn handle(&self, name: &str) -> Result<B::Handle> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.shut_down {
            return Err(Error::ShuttingDown);
        }
        if let Some(handle) = state.registry.handle(name) {
            return Ok(handle);
        }
        let handle = self.open_with_retry(state.engine()?, name, OpenMode::READ_WRITE)?;
        state.registry.set_handle(name, handle.clone());
        Ok(handle)
    }

    /// Give back one acquisition of `name`
    pub(crate) fn release(&self, name: &str) {
        if let Err(e) = self.inner.state.lock().registry.dec_use_count(name) {
            warn!(backend = %B::KIND, file = name, error = %e, "released a file more often than acquired");
        }
    }

    /// Physically close `name`; acquisitions stay counted and the next
    /// access reopens it
    pub fn close(&self, name: &str) -> Result<()> {
        self.inner.state.lock().close_handle(name)
    }

    pub fn inc_use_count(&self, name: &str) -> i64 {
        self.inner.state.lock().registry.inc_use_count(name)
    }

    /// Count one release of `name`. Going below zero is
    /// `Error::UseCount`, and a panic in debug builds.
    pub fn dec_use_count(&self, name: &str) -> Result<i64> {
        self.inner.state.lock().registry.dec_use_count(name)
    }

    pub fn use_count(&self, name: &str) -> i64 {
        self.inner.state.lock().registry.use_count(name)
    }

    /// Whether `name` is tracked by the registry
    pub fn exists(&self, name: &str) -> bool {
        self.inner.state.lock().registry.exists(name)
    }

    /// Stop tracking `name`, closing its cached handle
    pub fn erase_use_count(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if let Some(handle) = state.registry.erase(name) {
            state.engine()?.close_file(name, handle)?;
        }
        Ok(())
    }

    /// Names tracked by the registry, sorted
    pub fn tracked_files(&self) -> Vec<String> {
        self.inner.state.lock().registry.names()
    }

    /// Flush every idle file, close the rest and release the engine.
    ///
    /// Closing twice is a no-op, and a closed environment refuses to open
    /// again.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.shutdown_locked(&mut state)
    }

    fn shutdown_locked(&self, state: &mut EnvState<B>) -> Result<()> {
        if state.shut_down {
            return Ok(());
        }
        let flushed = self.flush_all_locked(state, true);
        state.shut_down = true;

        let mut first_error = flushed.err();
        if let Some(engine) = state.engine.take() {
            for (name, handle) in state.registry.take_handles() {
                if let Err(e) = engine.close_file(&name, handle) {
                    warn!(backend = %B::KIND, file = %name, error = %e, "failed to close file on shutdown");
                    first_error.get_or_insert(e);
                }
            }
            if let Err(e) = engine.close() {
                first_error.get_or_insert(e);
            }
            info!(backend = %B::KIND, root = %self.root().display(), "closed environment with files in use");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Environment<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("kind", &B::KIND)
            .field("root", &self.inner.config.data_dir)
            .finish()
    }
}
