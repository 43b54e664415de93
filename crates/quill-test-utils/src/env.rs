//! Isolated per-test environments.
//!
//! A [`TestEnv`] owns a temporary directory that holds the cache and config
//! directories, so the address record, log files, and user plugins of one
//! test never leak into another. The directory is deleted when the value is
//! dropped, even on panic.

use std::path::{Path, PathBuf};

use quill_config::{AppConfig, CONFIG_FILE_NAME, Transport};
use quill_core::{IpcClient, Session};
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use crate::config::TestConfigBuilder;

/// A test-scoped configuration rooted in a temporary directory.
pub struct TestEnv {
    pub config: AppConfig,
    temp_dir: TempDir,
}

impl TestEnv {
    /// Default config with every directory inside a fresh temp dir.
    pub fn new() -> Self {
        Self::with_transport(Transport::default())
    }

    pub fn with_transport(transport: Transport) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = TestConfigBuilder::new()
            .root(temp_dir.path())
            .transport(transport)
            .build();
        Self {
            config,
            temp_dir,
        }
    }

    /// Load `toml_content` through [`AppConfig::load`], then point any
    /// directory it leaves unset into the temp dir.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");

        let mut config = AppConfig::load(&config_path)
            .await
            .expect("failed to parse test config");
        let defaults = TestConfigBuilder::new().root(temp_dir.path()).build();
        config.paths.cache_dir = config.paths.cache_dir.or(defaults.paths.cache_dir);
        config.paths.config_dir = config.paths.config_dir.or(defaults.paths.config_dir);

        Self {
            config,
            temp_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn address_file(&self) -> PathBuf {
        self.config.address_file()
    }

    /// Overwrite the address record with arbitrary content.
    pub fn write_address_record(&self, content: &str) {
        let path = self.address_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create cache dir");
        }
        std::fs::write(&path, content).expect("failed to write address record");
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::from_config(&self.config)
    }

    /// Start a session on this environment's address record.
    pub async fn start_session<M>(&self) -> Session<M>
    where
        M: DeserializeOwned + Send + 'static,
    {
        quill_core::start_session(&self.address_file(), self.config.ipc.transport)
            .await
            .expect("failed to start session")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
