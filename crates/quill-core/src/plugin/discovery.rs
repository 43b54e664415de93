//! Enumerate plugin units on the search paths.
//!
//! A unit is either `<name>.toml` or a directory `<name>/` holding a
//! `plugin.toml`. Search paths are scanned in order and the first unit with
//! a given name wins, so the user directory shadows the built-in ones.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{MANIFEST_FILE_NAME, PluginDescriptor};

/// Errors that make discovery impossible.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read plugin directory {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
}

/// Discover every unit on `search_paths`, sorted by name.
///
/// Missing directories are skipped. Names starting with `reserved_prefix`
/// are internal helpers and never reported.
pub fn discover(
    search_paths: &[PathBuf],
    reserved_prefix: &str,
) -> Result<Vec<PluginDescriptor>, DiscoveryError> {
    let mut found: BTreeMap<String, PluginDescriptor> = BTreeMap::new();

    for dir in search_paths {
        for unit in scan_dir(dir)? {
            if unit.name.starts_with(reserved_prefix) {
                debug!(name = %unit.name, "Skipping reserved plugin name");
                continue;
            }
            match found.entry(unit.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(unit);
                }
                Entry::Occupied(existing) => {
                    debug!(
                        name = %unit.name,
                        kept = %existing.get().manifest.display(),
                        shadowed = %unit.manifest.display(),
                        "Plugin shadowed by an earlier search path"
                    );
                }
            }
        }
    }

    Ok(found.into_values().collect())
}

/// List the units directly inside `dir`, in file-name order.
fn scan_dir(dir: &Path) -> Result<Vec<PluginDescriptor>, DiscoveryError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), "Plugin directory does not exist");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(DiscoveryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            Err(e) => warn!(path = %dir.display(), error = %e, "Unreadable plugin directory entry"),
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .filter_map(|path| unit_at(dir, path))
        .collect())
}

fn unit_at(dir: &Path, path: PathBuf) -> Option<PluginDescriptor> {
    if path.is_dir() {
        let manifest = path.join(MANIFEST_FILE_NAME);
        if !manifest.is_file() {
            return None;
        }
        let name = unit_name(path.file_name()?.to_str(), &path)?;
        return Some(PluginDescriptor {
            name,
            manifest,
            root: path,
        });
    }

    if path.extension().is_some_and(|ext| ext == "toml") && path.is_file() {
        let name = unit_name(path.file_stem()?.to_str(), &path)?;
        return Some(PluginDescriptor {
            name,
            manifest: path,
            root: dir.to_path_buf(),
        });
    }

    None
}

fn unit_name(name: Option<&str>, path: &Path) -> Option<String> {
    match name {
        Some(name) if !name.is_empty() => Some(name.to_string()),
        _ => {
            warn!(path = %path.display(), "Ignoring plugin with a non UTF-8 name");
            None
        }
    }
}
