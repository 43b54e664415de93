#![deny(unsafe_code)]

//! Configuration loading, validation, and directory resolution for Quill.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure and
//! resolves the per-user directories (cache, config, plugins) that the IPC
//! session and plugin loader depend on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application directory name under the platform cache/config roots.
pub const APP_DIR_NAME: &str = "quill";

/// File name of the IPC address record inside the cache directory.
pub const ADDRESS_FILE_NAME: &str = "ipc_address.txt";

/// File name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "quill.toml";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory overrides.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Single-instance IPC configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Plugin discovery and loading.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Directory overrides. Unset entries fall back to the platform defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Cache directory (address record, log files).
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Config directory (config file, user plugins).
    #[serde(default)]
    pub config_dir: Option<String>,
}

/// Local transport used for the single-instance session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Unix domain socket where available, loopback TCP elsewhere.
    #[default]
    Auto,
    /// Unix domain socket in a private temporary directory.
    Unix,
    /// TCP on `127.0.0.1` with an OS-assigned port.
    Tcp,
}

impl Transport {
    /// Resolve `Auto` to the concrete transport for this platform.
    pub fn resolve(self) -> Transport {
        match self {
            Transport::Auto if cfg!(unix) => Transport::Unix,
            Transport::Auto => Transport::Tcp,
            other => other,
        }
    }
}

/// Configuration for the single-instance IPC session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Transport: "auto", "unix", or "tcp".
    #[serde(default)]
    pub transport: Transport,

    /// Deadline for connecting to a running instance, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Address record location. Defaults to `<cache dir>/ipc_address.txt`.
    #[serde(default)]
    pub address_file: Option<String>,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            address_file: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

/// Plugin discovery and loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Whether plugins are loaded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shuffle plugins within each dependency layer instead of sorting by name.
    #[serde(default)]
    pub shuffle: bool,

    /// Built-in plugin directories, searched after the user plugin directory.
    #[serde(default)]
    pub dirs: Vec<String>,

    /// Units whose name starts with this prefix are internal helpers, not plugins.
    #[serde(default = "default_reserved_prefix")]
    pub reserved_prefix: String,

    /// Plugin names that are never loaded.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shuffle: false,
            dirs: Vec::new(),
            reserved_prefix: default_reserved_prefix(),
            disabled: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reserved_prefix() -> String {
    "_".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ipc.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "ipc.connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        if matches!(&self.ipc.address_file, Some(p) if p.is_empty()) {
            return Err(ConfigError::Validation(
                "ipc.address_file must not be empty".to_string(),
            ));
        }
        if self.ipc.transport == Transport::Unix && !cfg!(unix) {
            return Err(ConfigError::Validation(
                "ipc.transport \"unix\" is not available on this platform".to_string(),
            ));
        }

        if self.plugins.reserved_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "plugins.reserved_prefix must not be empty".to_string(),
            ));
        }
        for (i, dir) in self.plugins.dirs.iter().enumerate() {
            if dir.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "plugins.dirs[{i}] must not be empty"
                )));
            }
        }
        for (i, name) in self.plugins.disabled.iter().enumerate() {
            if name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "plugins.disabled[{i}] must not be empty"
                )));
            }
        }

        if self.logging.level.is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    // ── Resolved directories ──────────────────────────────────────────

    /// Cache directory: address record and log files live here.
    pub fn cache_dir(&self) -> PathBuf {
        resolve_dir(self.paths.cache_dir.as_deref(), dirs::cache_dir())
    }

    /// Config directory: config file and user plugins live here.
    pub fn config_dir(&self) -> PathBuf {
        resolve_dir(self.paths.config_dir.as_deref(), dirs::config_dir())
    }

    /// User-writable plugin directory. Searched before the built-in ones.
    pub fn user_plugin_dir(&self) -> PathBuf {
        self.config_dir().join("plugins")
    }

    /// Location of the IPC address record.
    pub fn address_file(&self) -> PathBuf {
        match &self.ipc.address_file {
            Some(path) => PathBuf::from(path),
            None => self.cache_dir().join(ADDRESS_FILE_NAME),
        }
    }

    /// Plugin search paths in priority order: user directory first.
    pub fn plugin_search_paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.user_plugin_dir())
            .chain(self.plugins.dirs.iter().map(PathBuf::from))
            .collect()
    }

    /// Deadline for connecting to a running instance.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc.connect_timeout_ms)
    }

    /// Create the cache, config, and user plugin directories.
    pub async fn create_dirs(&self) -> Result<(), ConfigError> {
        for dir in [self.cache_dir(), self.config_dir(), self.user_plugin_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    AppConfig::default().config_dir().join(CONFIG_FILE_NAME)
}

fn resolve_dir(configured: Option<&str>, platform_root: Option<PathBuf>) -> PathBuf {
    match configured {
        Some(dir) => PathBuf::from(dir),
        None => platform_root
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME),
    }
}
