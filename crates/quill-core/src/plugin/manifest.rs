//! TOML manifests and the importer that turns them into plugins.
//!
//! ```toml
//! description = "Strip trailing whitespace on save"
//! setup_after = ["editor"]
//! builtin = "rstrip"              # or: command = ["./setup.sh", "--quiet"]
//! ```
//!
//! A `builtin` entry names a setup procedure the host registered in a
//! [`BuiltinRegistry`]. A `command` entry runs an external program at setup
//! time, with the unit's root as working directory.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{Plugin, PluginDescriptor, PluginError, PluginImporter};

/// Environment variable holding the plugin name for `command` plugins.
pub const PLUGIN_NAME_ENV: &str = "QUILL_PLUGIN_NAME";
/// Environment variable holding the plugin root for `command` plugins.
pub const PLUGIN_DIR_ENV: &str = "QUILL_PLUGIN_DIR";

/// Parsed contents of a plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub setup_before: BTreeSet<String>,
    #[serde(default)]
    pub setup_after: BTreeSet<String>,
    #[serde(default)]
    pub builtin: Option<String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

type SetupFn = dyn Fn() -> Result<(), PluginError> + Send + Sync;

/// In-process setup procedures, keyed by the id manifests refer to.
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    entries: HashMap<String, Arc<SetupFn>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `setup` under `id`, replacing any earlier registration.
    pub fn register<F>(&mut self, id: impl Into<String>, setup: F) -> &mut Self
    where
        F: Fn() -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.entries.insert(id.into(), Arc::new(setup));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Arc<SetupFn>> {
        self.entries.get(id).cloned()
    }
}

impl fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("BuiltinRegistry").field("ids", &ids).finish()
    }
}

/// Imports units from their TOML manifests.
#[derive(Debug, Clone, Default)]
pub struct ManifestImporter {
    builtins: BuiltinRegistry,
}

impl ManifestImporter {
    pub fn new(builtins: BuiltinRegistry) -> Self {
        Self { builtins }
    }
}

impl PluginImporter for ManifestImporter {
    fn import(&self, unit: &PluginDescriptor) -> Result<Box<dyn Plugin>, PluginError> {
        let content = fs::read_to_string(&unit.manifest).map_err(|source| {
            PluginError::ReadManifest {
                path: unit.manifest.clone(),
                source,
            }
        })?;
        let manifest = PluginManifest::parse(&content).map_err(|source| PluginError::Manifest {
            path: unit.manifest.clone(),
            source,
        })?;

        let entry = match (&manifest.builtin, &manifest.command) {
            (Some(id), None) => {
                let setup = self
                    .builtins
                    .get(id)
                    .ok_or_else(|| PluginError::UnknownBuiltin(id.clone()))?;
                Entry::Builtin(setup)
            }
            (None, Some(argv)) if !argv.is_empty() => Entry::Command(argv.clone()),
            _ => return Err(PluginError::Entry(unit.manifest.clone())),
        };

        debug!(
            name = %unit.name,
            description = manifest.description.as_deref().unwrap_or(""),
            "Parsed plugin manifest"
        );

        Ok(Box::new(ManifestPlugin {
            name: unit.name.clone(),
            root: unit.root.clone(),
            setup_before: manifest.setup_before,
            setup_after: manifest.setup_after,
            entry,
        }))
    }
}

enum Entry {
    Builtin(Arc<SetupFn>),
    Command(Vec<String>),
}

struct ManifestPlugin {
    name: String,
    root: PathBuf,
    setup_before: BTreeSet<String>,
    setup_after: BTreeSet<String>,
    entry: Entry,
}

impl Plugin for ManifestPlugin {
    fn setup_before(&self) -> BTreeSet<String> {
        self.setup_before.clone()
    }

    fn setup_after(&self) -> BTreeSet<String> {
        self.setup_after.clone()
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        match &self.entry {
            Entry::Builtin(setup) => setup(),
            Entry::Command(argv) => self.run_command(argv),
        }
    }
}

impl ManifestPlugin {
    fn run_command(&self, argv: &[String]) -> Result<(), PluginError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(PluginError::Setup("empty command".into()));
        };

        let spawn_error = |source| PluginError::Spawn {
            program: program.clone(),
            source,
        };
        // The child runs inside the root, so a relative root must not be
        // applied twice.
        let root = std::path::absolute(&self.root).map_err(spawn_error)?;

        // Relative programs with a path component resolve against the unit.
        let program_path = if program.contains('/') {
            root.join(program)
        } else {
            PathBuf::from(program)
        };

        let status = Command::new(&program_path)
            .args(args)
            .current_dir(&root)
            .env(PLUGIN_NAME_ENV, &self.name)
            .env(PLUGIN_DIR_ENV, &root)
            .status()
            .map_err(spawn_error)?;

        if status.success() {
            Ok(())
        } else {
            Err(PluginError::Exit {
                program: program.clone(),
                status,
            })
        }
    }
}
