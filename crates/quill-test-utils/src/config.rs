//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use quill_config::{AppConfig, Transport};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .root(tmp.path())
///     .transport(Transport::Tcp)
///     .disabled(["welcome"])
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Put the cache and config directories under `root`.
    pub fn root(self, root: &Path) -> Self {
        self.cache_dir(&root.join("cache"))
            .config_dir(&root.join("config"))
    }

    pub fn cache_dir(mut self, dir: &Path) -> Self {
        self.config.paths.cache_dir = Some(dir.display().to_string());
        self
    }

    pub fn config_dir(mut self, dir: &Path) -> Self {
        self.config.paths.config_dir = Some(dir.display().to_string());
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.ipc.transport = transport;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ipc.connect_timeout_ms = ms;
        self
    }

    /// Add a built-in plugin directory, searched after the user directory.
    pub fn plugin_dir(mut self, dir: &Path) -> Self {
        self.config.plugins.dirs.push(dir.display().to_string());
        self
    }

    pub fn disabled<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.config
            .plugins
            .disabled
            .extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn shuffle_plugins(mut self, shuffle: bool) -> Self {
        self.config.plugins.shuffle = shuffle;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
