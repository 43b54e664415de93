//! Dependency graph and load ordering.
//!
//! The graph maps each imported plugin to the plugins that must be set up
//! before it. Ordering is Kahn's algorithm in layers: every plugin whose
//! dependencies are all placed forms the next layer, the layer is sorted
//! (or shuffled), appended, and removed. When plugins remain but none is
//! ready, the remainder contains a cycle; the order built so far is kept
//! and the remainder is reported as a [`CycleError`].

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand::seq::SliceRandom;

/// Ordering hints declared by one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Plugins that must be set up after this one.
    pub before: BTreeSet<String>,
    /// Plugins that must be set up before this one.
    pub after: BTreeSet<String>,
}

/// How plugins within one layer are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Ascending name, for reproducible start-up.
    #[default]
    ByName,
    /// Random permutation, to surface hidden order dependencies.
    Shuffle,
}

impl From<bool> for TieBreak {
    fn from(shuffle: bool) -> Self {
        if shuffle {
            TieBreak::Shuffle
        } else {
            TieBreak::ByName
        }
    }
}

/// A cycle among the remaining plugins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circular dependency: {}", describe(&self.edges))]
pub struct CycleError {
    /// Each strongly connected group of plugins, sorted by name.
    pub cycles: Vec<BTreeSet<String>>,
    /// Dependency edges between members of the same group.
    pub edges: BTreeMap<String, BTreeSet<String>>,
    /// Plugins not on a cycle that depend, directly or not, on one.
    pub blocked: BTreeSet<String>,
}

impl CycleError {
    /// Every plugin left unordered: cycle members and the plugins they block.
    pub fn unresolved(&self) -> BTreeSet<String> {
        self.cycles
            .iter()
            .flatten()
            .chain(&self.blocked)
            .cloned()
            .collect()
    }

    fn from_residual(residual: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let reach: BTreeMap<&str, BTreeSet<&str>> = residual
            .keys()
            .map(|name| (name.as_str(), reachable(residual, name)))
            .collect();
        let on_cycle = |name: &str| reach[name].contains(name);

        let mut cycles: Vec<BTreeSet<String>> = Vec::new();
        let mut blocked = BTreeSet::new();
        for name in residual.keys() {
            if !on_cycle(name.as_str()) {
                blocked.insert(name.clone());
                continue;
            }
            if cycles.iter().any(|group| group.contains(name)) {
                continue;
            }
            let group = reach[name.as_str()]
                .iter()
                .filter(|other| reach[**other].contains(name.as_str()))
                .map(|other| other.to_string())
                .collect();
            cycles.push(group);
        }

        let edges = cycles
            .iter()
            .flat_map(|group| {
                group.iter().map(move |name| {
                    let deps = residual[name].intersection(group).cloned().collect();
                    (name.clone(), deps)
                })
            })
            .collect();

        Self {
            cycles,
            edges,
            blocked,
        }
    }
}

fn describe(edges: &BTreeMap<String, BTreeSet<String>>) -> String {
    edges
        .iter()
        .map(|(name, deps)| {
            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            format!("{name} depends on {}", deps.join(" and "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every node reachable from `start` by following dependency edges.
fn reachable<'a>(graph: &'a BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = graph
        .get(start)
        .map(|deps| deps.iter().map(String::as_str).collect())
        .unwrap_or_default();
    while let Some(name) = stack.pop() {
        if let Some((key, deps)) = graph.get_key_value(name) {
            if seen.insert(key.as_str()) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
    }
    seen
}

/// The outcome of ordering a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Plugins in load order. Excludes everything in `cycle`.
    pub order: Vec<String>,
    /// The unresolvable remainder, if any.
    pub cycle: Option<CycleError>,
}

/// Plugin name to the set of plugin names that must load before it.
///
/// Only names that are keys appear as dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    deps: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph from each plugin's hints. Hints naming plugins that
    /// are not present are dropped: they order, they do not require. A hint
    /// naming the plugin itself is dropped too.
    pub fn build(plugins: &BTreeMap<String, Constraints>) -> Self {
        let mut deps: BTreeMap<String, BTreeSet<String>> = plugins
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();

        for (name, constraints) in plugins {
            let known = |other: &&String| *other != name && plugins.contains_key(*other);
            for dep in constraints.after.iter().filter(known) {
                if let Some(set) = deps.get_mut(name) {
                    set.insert(dep.clone());
                }
            }
            for dependent in constraints.before.iter().filter(known) {
                if let Some(set) = deps.get_mut(dependent) {
                    set.insert(name.clone());
                }
            }
        }

        Self { deps }
    }

    /// Plugins that must load before `name`.
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.deps.get(name)
    }

    /// Number of plugins in the graph.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// Whether the graph has no plugins.
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Compute a load order layer by layer.
    pub fn resolve<R: Rng + ?Sized>(&self, tie_break: TieBreak, rng: &mut R) -> Resolution {
        let mut remaining = self.deps.clone();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            // BTreeMap iteration already yields the layer in name order.
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| name.clone())
                .collect();

            if ready.is_empty() {
                return Resolution {
                    order,
                    cycle: Some(CycleError::from_residual(&remaining)),
                };
            }

            if tie_break == TieBreak::Shuffle {
                ready.shuffle(rng);
            }

            for name in &ready {
                remaining.remove(name);
            }
            for deps in remaining.values_mut() {
                for name in &ready {
                    deps.remove(name);
                }
            }
            order.extend(ready);
        }

        Resolution { order, cycle: None }
    }
}
