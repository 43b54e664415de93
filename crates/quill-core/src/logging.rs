//! Log output setup.
//!
//! By default every instance logs to the cache directory. The first instance
//! takes `log.txt`; an instance that finds it locked by a running one moves
//! on to `log2.txt`, `log3.txt`, and so on, so concurrent instances never
//! interleave their output.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Upper bound on `logN.txt` candidates tried before giving up.
const MAX_LOG_FILES: usize = 64;

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error, with colors.
    Stderr,
    /// A specific file, truncated on start-up.
    File(PathBuf),
    /// The first unlocked `log*.txt` in this directory.
    CacheDir(PathBuf),
}

/// Errors from setting up logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file in {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Build the event filter: `RUST_LOG` wins, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_level).map_err(|e| LoggingError::Filter {
        filter: default_level.to_string(),
        reason: e.to_string(),
    })
}

/// Open and lock the first free `log.txt`, `log2.txt`, ... in `dir`.
///
/// The returned file is empty. Its lock is held until the file is dropped,
/// which for the installed subscriber means the end of the process.
pub fn open_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;

    for n in 1..=MAX_LOG_FILES {
        let path = dir.join(log_file_name(n));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {
                // Only truncate once the file is ours.
                file.set_len(0)?;
                return Ok((path, file));
            }
            Err(TryLockError::WouldBlock) => continue,
            Err(TryLockError::Error(e)) => return Err(e),
        }
    }

    Err(io::Error::other(format!(
        "all {MAX_LOG_FILES} log files in {} are locked",
        dir.display()
    )))
}

fn log_file_name(n: usize) -> String {
    if n == 1 {
        "log.txt".to_string()
    } else {
        format!("log{n}.txt")
    }
}

/// Install the global `tracing` subscriber.
///
/// Returns the log file path when logging goes to a file.
pub fn init(target: &LogTarget, default_level: &str) -> Result<Option<PathBuf>, LoggingError> {
    let filter = env_filter(default_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let (result, path) = match target {
        LogTarget::Stderr => (builder.with_writer(io::stderr).try_init(), None),
        LogTarget::File(path) => {
            let file = File::create(path).map_err(|source| LoggingError::Open {
                path: path.clone(),
                source,
            })?;
            let result = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            (result, Some(path.clone()))
        }
        LogTarget::CacheDir(dir) => {
            let (path, file) = open_log_file(dir).map_err(|source| LoggingError::Open {
                path: dir.clone(),
                source,
            })?;
            let result = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            (result, Some(path))
        }
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))?;
    Ok(path)
}
