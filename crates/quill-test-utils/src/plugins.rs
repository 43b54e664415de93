//! Plugin directory fixtures and recording builtins.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quill_core::{BuiltinRegistry, PluginError};
use tempfile::TempDir;

/// Render a manifest for a `builtin` plugin with ordering hints.
pub fn builtin_manifest(id: &str, before: &[&str], after: &[&str]) -> String {
    format!(
        "builtin = {id:?}\nsetup_before = {before:?}\nsetup_after = {after:?}\n"
    )
}

/// A temporary plugin search directory.
pub struct PluginDir {
    dir: TempDir,
}

impl PluginDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create plugin dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a `<name>.toml` unit.
    pub fn file_unit(&self, name: &str, manifest: &str) -> PathBuf {
        let path = self.path().join(format!("{name}.toml"));
        std::fs::write(&path, manifest).expect("failed to write manifest");
        path
    }

    /// Write a `<name>/plugin.toml` unit.
    pub fn dir_unit(&self, name: &str, manifest: &str) -> PathBuf {
        let dir = self.path().join(name);
        std::fs::create_dir_all(&dir).expect("failed to create unit dir");
        let path = dir.join(quill_core::plugin::MANIFEST_FILE_NAME);
        std::fs::write(&path, manifest).expect("failed to write manifest");
        path
    }
}

impl Default for PluginDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Records the order in which builtin setups ran.
#[derive(Clone, Default)]
pub struct SetupRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl SetupRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` as a builtin that records its call and succeeds.
    pub fn register(&self, registry: &mut BuiltinRegistry, id: &str) {
        let calls = self.calls.clone();
        let name = id.to_string();
        registry.register(id, move || {
            tracing::debug!(builtin = %name, "Recorded setup");
            calls.lock().expect("recorder poisoned").push(name.clone());
            Ok(())
        });
    }

    /// Register `id` as a builtin that records its call and fails.
    pub fn register_failing(&self, registry: &mut BuiltinRegistry, id: &str) {
        let calls = self.calls.clone();
        let name = id.to_string();
        registry.register(id, move || {
            calls.lock().expect("recorder poisoned").push(name.clone());
            Err(PluginError::Setup(format!("{name} refused to start")))
        });
    }

    /// Register `id` as a builtin that records its call and panics.
    pub fn register_panicking(&self, registry: &mut BuiltinRegistry, id: &str) {
        let calls = self.calls.clone();
        let name = id.to_string();
        registry.register(id, move || {
            calls.lock().expect("recorder poisoned").push(name.clone());
            panic!("{name} blew up during setup");
        });
    }

    /// Builtin ids in the order their setup ran.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("recorder poisoned").clone()
    }
}
