use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use glob::glob;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// # Logging Options
///
/// Where log output goes. Stdout is always on; a file is added when `dir`
/// is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Prefix of log file names, `<app_name>-<timestamp>.log`.
    pub app_name: String,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `lib_livefeed=debug`.
    pub level: String,
    /// Log file directory. Created if missing.
    pub dir: Option<PathBuf>,
    /// How many older log files survive startup.
    pub keep_files: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            app_name: "live_tail".to_string(),
            level: "info".to_string(),
            dir: None,
            keep_files: 1,
        }
    }
}

/// Errors while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("cannot create log directory {}: {source}", dir.display())]
    Io {
        /// Directory.
        dir: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The level string is not a valid filter.
    #[error("invalid log filter '{0}'")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error(transparent)]
    Init(#[from] TryInitError),
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
#[derive(Debug)]
pub struct LoggingGuard {
    log_file: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// The file this run writes to, if any.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Installs the global tracing subscriber.
///
/// Old `<app_name>-*.log` files are pruned first, keeping the newest
/// `keep_files`.
pub fn init_logging(options: &LoggingOptions) -> Result<LoggingGuard, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.level).map_err(|_| LoggingError::Filter(options.level.clone()))?,
    };

    let (file_layer, worker, log_file) = match &options.dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
                dir: dir.clone(),
                source,
            })?;
            rotate_logs(&options.app_name, dir, options.keep_files);

            let file_name = log_file_name(&options.app_name);
            let appender = tracing_appender::rolling::never(dir, &file_name);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(worker), Some(dir.join(file_name)))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard {
        log_file,
        _worker: worker,
    })
}

/// `<app_name>-YYYYmmdd_HHMMSS.log`, sortable by name.
pub fn log_file_name(app_name: &str) -> String {
    format!("{}-{}.log", app_name, Local::now().format("%Y%m%d_%H%M%S"))
}

/// Deletes all but the newest `keep` log files of `app_name` in `log_dir`.
/// Newest is decided by file name. Returns the deleted paths.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Vec<PathBuf> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let entries = match glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Invalid log rotation pattern {pattern}: {e}");
            return Vec::new();
        }
    };

    let mut log_files: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for old_file in log_files.into_iter().skip(keep) {
        match fs::remove_file(&old_file) {
            Ok(()) => removed.push(old_file),
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_newest_files_of_this_app() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "live_tail-20240101_000000.log",
            "live_tail-20240301_000000.log",
            "live_tail-20240201_000000.log",
            "other-20230101_000000.log",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let removed = rotate_logs("live_tail", dir.path(), 1);
        assert_eq!(removed.len(), 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["live_tail-20240301_000000.log", "other-20230101_000000.log"]);
    }

    #[test]
    fn keep_zero_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app-1.log"), "x").unwrap();
        assert_eq!(rotate_logs("app", dir.path(), 0).len(), 1);
    }

    #[test]
    fn file_names_carry_app_prefix() {
        let name = log_file_name("live_tail");
        assert!(name.starts_with("live_tail-"));
        assert!(name.ends_with(".log"));
    }
}
