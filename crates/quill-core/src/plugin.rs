//! Plugin discovery, load ordering, and fault-isolated initialization.
//!
//! A plugin unit is found on disk by [`discovery`], turned into a live
//! [`Plugin`] by a [`PluginImporter`], ordered by its `setup_before` /
//! `setup_after` hints in [`graph`], and initialized by the
//! [`PluginScheduler`]. One broken unit never blocks the others: import
//! failures, setup failures, panics, and dependency cycles all end up as
//! entries in the [`LoadReport`].
//!
//! ```text
//!  search paths ──discover──▶ descriptors ──import──▶ plugins
//!                                                       │ before/after
//!                                                ┌──────▼───────┐
//!                                                │ dependency   │
//!                                                │ graph (Kahn) │
//!                                                └──────┬───────┘
//!                                     load order ───────┘
//!                                         │ setup() one by one
//!                                         ▼
//!                                     LoadReport
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitStatus;

pub mod discovery;
pub mod graph;
pub mod manifest;
pub mod report;
pub mod scheduler;

pub use discovery::DiscoveryError;
pub use graph::{CycleError, DependencyGraph, TieBreak};
pub use manifest::{BuiltinRegistry, ManifestImporter, PluginManifest};
pub use report::{LoadReport, UnitOutcome};
pub use scheduler::PluginScheduler;

/// Manifest file name inside a directory-style plugin unit.
pub const MANIFEST_FILE_NAME: &str = "plugin.toml";

/// A plugin unit found on a search path, not yet imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Unit name, unique across all search paths.
    pub name: String,
    /// The unit's manifest file.
    pub manifest: PathBuf,
    /// Directory the unit's relative paths resolve against.
    pub root: PathBuf,
}

/// An imported plugin, ready to be ordered and set up.
pub trait Plugin {
    /// Names of plugins that must be set up after this one.
    fn setup_before(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Names of plugins that must be set up before this one.
    fn setup_after(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Initialize the plugin. Called at most once per process.
    fn setup(&mut self) -> Result<(), PluginError>;
}

/// Turns a discovered unit into a live [`Plugin`].
pub trait PluginImporter {
    /// Import the unit described by `unit`.
    fn import(&self, unit: &PluginDescriptor) -> Result<Box<dyn Plugin>, PluginError>;
}

/// Errors from importing or setting up a single plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to read manifest {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("manifest {0} must set exactly one of `builtin` or a non-empty `command`")]
    Entry(PathBuf),

    #[error("unknown builtin plugin {0:?}")]
    UnknownBuiltin(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("panicked: {0}")]
    Panicked(String),
}
