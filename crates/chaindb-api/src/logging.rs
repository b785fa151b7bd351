//! Logging configuration for chaindb
//!
//! Storage code only emits `tracing` events. Installing a subscriber is up
//! to the embedding process; [`LogConfig`] covers the usual setups,
//! including the backend error log under the data directory.

use chaindb_btree::ERROR_LOG;
use chaindb_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a file
    File(PathBuf),
    /// Output to both stdout and file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Compact single-line format
    Compact,
}

/// When a log file is rolled over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// Append to one file forever
    Never,
    /// Start a new dated file every day
    Daily,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level filter; `RUST_LOG` takes precedence
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
    /// File rollover policy
    pub rotation: LogRotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Pretty,
            rotation: LogRotation::Daily,
        }
    }
}

impl LogConfig {
    pub fn info() -> Self {
        Self::default()
    }

    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    pub fn warn() -> Self {
        Self {
            level: "warn".to_string(),
            ..Default::default()
        }
    }

    /// Storage warnings and errors appended to `<root>/db.log`
    pub fn db_log(root: impl AsRef<Path>) -> Self {
        Self {
            level: "chaindb=warn,chaindb_btree=warn,chaindb_lsm=warn,chaindb_wal=warn".to_string(),
            output: LogOutput::File(root.as_ref().join(ERROR_LOG)),
            format: LogFormat::Compact,
            rotation: LogRotation::Never,
        }
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    fn appender(&self, path: &Path) -> RollingFileAppender {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(ERROR_LOG);
        match self.rotation {
            LogRotation::Never => tracing_appender::rolling::never(dir, file),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, file),
        }
    }

    /// Install this configuration as the global subscriber
    ///
    /// Returns a guard that must be kept alive while file output is wanted;
    /// dropping it flushes and stops the writer thread. Fails when the
    /// filter does not parse or a global subscriber is already installed.
    ///
    /// ```rust,no_run
    /// use chaindb::logging::LogConfig;
    ///
    /// let _guard = LogConfig::db_log("./data").init()?;
    /// # Ok::<(), chaindb::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::InvalidInput(format!("bad log filter {:?}: {}", self.level, e)))?;
        let registry = tracing_subscriber::registry().with(env_filter);

        let (installed, guard) = match (&self.output, self.format) {
            (LogOutput::Stdout, LogFormat::Pretty) => {
                (registry.with(fmt::layer().pretty()).try_init(), None)
            }
            (LogOutput::Stdout, LogFormat::Compact) => {
                (registry.with(fmt::layer().compact()).try_init(), None)
            }
            (LogOutput::File(path), format) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let (writer, guard) = tracing_appender::non_blocking(self.appender(path));
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                let installed = match format {
                    LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
                    LogFormat::Compact => registry.with(layer.compact()).try_init(),
                };
                (installed, Some(guard))
            }
            (LogOutput::Both(path), _) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let (writer, guard) = tracing_appender::non_blocking(self.appender(path));
                let installed = registry
                    .with(fmt::layer())
                    .with(fmt::layer().with_writer(writer).with_ansi(false))
                    .try_init();
                (installed, Some(guard))
            }
        };

        installed.map_err(|e| Error::InvalidInput(format!("logging already initialized: {}", e)))?;
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(matches!(config.output, LogOutput::Stdout));
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::debug()
            .with_file("/tmp/test.log")
            .with_format(LogFormat::Compact)
            .with_rotation(LogRotation::Never);
        assert_eq!(config.level, "debug");
        assert!(matches!(config.output, LogOutput::File(_)));
        assert!(matches!(config.format, LogFormat::Compact));
    }

    #[test]
    fn test_db_log_preset() {
        let config = LogConfig::db_log("/var/chain");
        match config.output {
            LogOutput::File(path) => assert_eq!(path, Path::new("/var/chain/db.log")),
            other => panic!("unexpected output {:?}", other),
        }
        assert_eq!(config.rotation, LogRotation::Never);
        assert!(config.level.contains("chaindb_btree=warn"));
    }
}
