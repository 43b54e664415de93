//! Discovery, ordering, and isolated setup of plugins.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use rand::Rng;
use tracing::{debug, error, info, warn};

use quill_config::AppConfig;

use super::discovery::{self, DiscoveryError};
use super::graph::{Constraints, DependencyGraph, TieBreak};
use super::report::{LoadReport, UnitOutcome};
use super::{Plugin, PluginDescriptor, PluginError, PluginImporter};

/// Default prefix for helper modules that are not plugins.
pub const DEFAULT_RESERVED_PREFIX: &str = "_";

/// Finds plugin units and sets them up in dependency order.
#[derive(Debug, Clone)]
pub struct PluginScheduler<I> {
    search_paths: Vec<PathBuf>,
    reserved_prefix: String,
    disabled: BTreeSet<String>,
    importer: I,
}

impl<I: PluginImporter> PluginScheduler<I> {
    /// Scan `search_paths` in order; earlier paths shadow later ones.
    pub fn new(search_paths: Vec<PathBuf>, importer: I) -> Self {
        Self {
            search_paths,
            reserved_prefix: DEFAULT_RESERVED_PREFIX.to_string(),
            disabled: BTreeSet::new(),
            importer,
        }
    }

    /// Build from the `[plugins]` config section.
    pub fn from_config(config: &AppConfig, importer: I) -> Self {
        Self::new(config.plugin_search_paths(), importer)
            .with_reserved_prefix(config.plugins.reserved_prefix.clone())
            .with_disabled(config.plugins.disabled.iter().cloned())
    }

    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefix = prefix.into();
        self
    }

    /// Never report units with these names from [`discover`](Self::discover).
    pub fn with_disabled(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.disabled = names.into_iter().collect();
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn importer(&self) -> &I {
        &self.importer
    }

    /// List every enabled unit on the search paths, sorted by name.
    pub fn discover(&self) -> Result<Vec<PluginDescriptor>, DiscoveryError> {
        let mut units = discovery::discover(&self.search_paths, &self.reserved_prefix)?;
        units.retain(|unit| {
            let enabled = !self.disabled.contains(&unit.name);
            if !enabled {
                info!(name = %unit.name, "Plugin disabled in config");
            }
            enabled
        });
        info!(count = units.len(), "Found plugins");
        Ok(units)
    }

    /// Import, order, and set up `units`.
    ///
    /// Within a dependency layer plugins are set up by name, or in random
    /// order when `shuffle` is set. Nothing a single plugin does can abort
    /// the run; every outcome lands in the returned report.
    pub fn load(&self, units: &[PluginDescriptor], shuffle: bool) -> LoadReport {
        self.load_with_rng(units, TieBreak::from(shuffle), &mut rand::thread_rng())
    }

    /// Like [`load`](Self::load) with an explicit tie-break and RNG.
    pub fn load_with_rng<R: Rng + ?Sized>(
        &self,
        units: &[PluginDescriptor],
        tie_break: TieBreak,
        rng: &mut R,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut plugins: BTreeMap<String, Box<dyn Plugin>> = BTreeMap::new();
        let mut constraints: BTreeMap<String, Constraints> = BTreeMap::new();

        // ── Import ──────────────────────────────────────────────────
        for unit in units {
            if report.outcomes.contains_key(&unit.name) || plugins.contains_key(&unit.name) {
                warn!(
                    name = %unit.name,
                    manifest = %unit.manifest.display(),
                    "Duplicate plugin name, ignoring"
                );
                continue;
            }
            report.discovered.push(unit.name.clone());

            debug!(name = %unit.name, "Importing plugin");
            let imported = isolate(|| {
                let plugin = self.importer.import(unit)?;
                let hints = Constraints {
                    before: plugin.setup_before(),
                    after: plugin.setup_after(),
                };
                Ok((plugin, hints))
            });

            match imported {
                Ok((plugin, hints)) => {
                    plugins.insert(unit.name.clone(), plugin);
                    constraints.insert(unit.name.clone(), hints);
                }
                Err(e) => {
                    error!(name = %unit.name, error = %e, "Failed to import plugin");
                    report
                        .outcomes
                        .insert(unit.name.clone(), UnitOutcome::ImportFailed(e.to_string()));
                }
            }
        }
        report.discovered.sort();

        // ── Order ───────────────────────────────────────────────────
        let resolution = DependencyGraph::build(&constraints).resolve(tie_break, rng);
        if let Some(cycle) = &resolution.cycle {
            error!(%cycle, "Plugins with circular dependencies will not be set up");
            for name in cycle.unresolved() {
                report.outcomes.insert(name, UnitOutcome::SkippedCycle);
            }
        }
        report.cycle = resolution.cycle;

        // ── Setup ───────────────────────────────────────────────────
        for name in &resolution.order {
            let Some(plugin) = plugins.get_mut(name) else {
                continue;
            };
            debug!(%name, "Running setup");
            let outcome = match isolate(|| plugin.setup()) {
                Ok(()) => UnitOutcome::Loaded,
                Err(e) => {
                    error!(%name, error = %e, "Plugin setup failed");
                    UnitOutcome::InitFailed(e.to_string())
                }
            };
            report.outcomes.insert(name.clone(), outcome);
        }
        report.order = resolution.order;

        info!(
            loaded = report.loaded().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            "Plugin loading finished"
        );
        report
    }
}

/// Run one per-plugin step, turning a panic into [`PluginError::Panicked`].
fn isolate<T>(step: impl FnOnce() -> Result<T, PluginError>) -> Result<T, PluginError> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked(panic_message(payload))),
    }
}

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Behavior {
        before: &'static [&'static str],
        after: &'static [&'static str],
        import_fails: bool,
        setup_fails: bool,
        setup_panics: bool,
    }

    struct FakePlugin {
        name: String,
        behavior: Behavior,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for FakePlugin {
        fn setup_before(&self) -> BTreeSet<String> {
            self.behavior.before.iter().map(|s| s.to_string()).collect()
        }

        fn setup_after(&self) -> BTreeSet<String> {
            self.behavior.after.iter().map(|s| s.to_string()).collect()
        }

        fn setup(&mut self) -> Result<(), PluginError> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.behavior.setup_panics {
                panic!("{} exploded", self.name);
            }
            if self.behavior.setup_fails {
                return Err(PluginError::Setup("refused".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeImporter {
        behaviors: BTreeMap<String, Behavior>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeImporter {
        fn with(mut self, name: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(name.to_string(), behavior);
            self
        }

        fn setup_calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn units(&self) -> Vec<PluginDescriptor> {
            self.behaviors
                .keys()
                .map(|name| PluginDescriptor {
                    name: name.clone(),
                    manifest: PathBuf::from(format!("{name}.toml")),
                    root: PathBuf::from("."),
                })
                .collect()
        }
    }

    impl PluginImporter for FakeImporter {
        fn import(&self, unit: &PluginDescriptor) -> Result<Box<dyn Plugin>, PluginError> {
            let behavior = self.behaviors.get(&unit.name).cloned().unwrap_or_default();
            if behavior.import_fails {
                return Err(PluginError::UnknownBuiltin(unit.name.clone()));
            }
            Ok(Box::new(FakePlugin {
                name: unit.name.clone(),
                behavior,
                log: self.log.clone(),
            }))
        }
    }

    fn after(names: &'static [&'static str]) -> Behavior {
        Behavior {
            after: names,
            ..Behavior::default()
        }
    }

    fn before(names: &'static [&'static str]) -> Behavior {
        Behavior {
            before: names,
            ..Behavior::default()
        }
    }

    fn load(importer: FakeImporter) -> (LoadReport, Vec<String>) {
        let units = importer.units();
        let scheduler = PluginScheduler::new(Vec::new(), importer);
        let report = scheduler.load(&units, false);
        (report, scheduler.importer().setup_calls())
    }

    #[test]
    fn test_ties_broken_by_name() {
        let importer = FakeImporter::default()
            .with("c", after(&["a"]))
            .with("b", after(&["a"]))
            .with("a", Behavior::default());

        let (report, calls) = load(importer);
        assert_eq!(report.load_order(), ["a", "b", "c"]);
        assert_eq!(calls, vec!["a", "b", "c"]);
        assert_eq!(report.loaded(), vec!["a", "b", "c"]);
        assert!(report.cycle().is_none());
    }

    #[test]
    fn test_cycle_is_not_fatal() {
        let importer = FakeImporter::default()
            .with("x", before(&["y"]))
            .with("y", before(&["x"]))
            .with("z", Behavior::default());

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["z"]);
        assert_eq!(report.load_order(), ["z"]);
        assert_eq!(report.outcome("z"), Some(&UnitOutcome::Loaded));
        assert_eq!(report.outcome("x"), Some(&UnitOutcome::SkippedCycle));
        assert_eq!(report.outcome("y"), Some(&UnitOutcome::SkippedCycle));

        let cycle = report.cycle().unwrap();
        assert_eq!(cycle.cycles.len(), 1);
        assert!(cycle.cycles[0].contains("x") && cycle.cycles[0].contains("y"));
    }

    #[test]
    fn test_blocked_units_skipped() {
        let importer = FakeImporter::default()
            .with("x", after(&["y"]))
            .with("y", after(&["x"]))
            .with("needs_x", after(&["x"]))
            .with("free", Behavior::default());

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["free"]);
        assert_eq!(report.skipped(), vec!["needs_x", "x", "y"]);
        assert!(report.cycle().unwrap().blocked.contains("needs_x"));
    }

    #[test]
    fn test_self_dependency_still_loads() {
        let importer = FakeImporter::default()
            .with("solo", after(&["solo"]))
            .with("user", after(&["solo"]));

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["solo", "user"]);
        assert_eq!(report.loaded(), vec!["solo", "user"]);
        assert!(report.cycle().is_none());
    }

    #[test]
    fn test_setup_failure_does_not_stop_loading() {
        let importer = FakeImporter::default()
            .with("a", Behavior::default())
            .with(
                "b",
                Behavior {
                    setup_fails: true,
                    ..Behavior::default()
                },
            )
            .with("c", Behavior::default());

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["a", "b", "c"]);
        assert_eq!(report.loaded(), vec!["a", "c"]);
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "b");
        assert!(matches!(
            failed[0].1,
            UnitOutcome::InitFailed(detail) if detail.contains("refused")
        ));
    }

    #[test]
    fn test_setup_panic_is_contained() {
        let importer = FakeImporter::default()
            .with(
                "boom",
                Behavior {
                    setup_panics: true,
                    ..Behavior::default()
                },
            )
            .with("calm", after(&["boom"]));

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["boom", "calm"]);
        assert_eq!(report.loaded(), vec!["calm"]);
        assert!(matches!(
            report.outcome("boom"),
            Some(UnitOutcome::InitFailed(detail)) if detail.contains("boom exploded")
        ));
    }

    #[test]
    fn test_import_failure_excluded_from_graph() {
        let importer = FakeImporter::default()
            .with(
                "broken",
                Behavior {
                    import_fails: true,
                    ..Behavior::default()
                },
            )
            // The hint on a failed import is dropped, not a blocker.
            .with("user", after(&["broken"]));

        let (report, calls) = load(importer);
        assert_eq!(calls, vec!["user"]);
        assert_eq!(report.load_order(), ["user"]);
        assert!(matches!(
            report.outcome("broken"),
            Some(UnitOutcome::ImportFailed(_))
        ));
        assert_eq!(report.discovered(), ["broken", "user"]);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let importer = FakeImporter::default().with("dup", Behavior::default());
        let mut units = importer.units();
        units.push(PluginDescriptor {
            name: "dup".into(),
            manifest: PathBuf::from("elsewhere/dup.toml"),
            root: PathBuf::from("elsewhere"),
        });

        let scheduler = PluginScheduler::new(Vec::new(), importer);
        let report = scheduler.load(&units, false);
        assert_eq!(report.discovered(), ["dup"]);
        assert_eq!(scheduler.importer().setup_calls(), vec!["dup"]);
    }

    #[test]
    fn test_shuffled_load_respects_constraints() {
        let importer = FakeImporter::default()
            .with("editor", before(&["tabs", "statusbar"]))
            .with("tabs", Behavior::default())
            .with("statusbar", Behavior::default())
            .with("autocomplete", before(&["tabs2spaces"]))
            .with("tabs2spaces", after(&["tabs"]))
            .with("pastebin", after(&["run"]))
            .with("run", Behavior::default());
        let units = importer.units();
        let scheduler = PluginScheduler::new(Vec::new(), importer);

        for seed in 0..16 {
            let mut rng = StdRng::seed_from_u64(seed);
            let report = scheduler.load_with_rng(&units, TieBreak::Shuffle, &mut rng);
            let order = report.load_order();
            let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
            assert_eq!(order.len(), 7);
            assert!(pos("editor") < pos("tabs"));
            assert!(pos("editor") < pos("statusbar"));
            assert!(pos("autocomplete") < pos("tabs2spaces"));
            assert!(pos("tabs") < pos("tabs2spaces"));
            assert!(pos("run") < pos("pastebin"));
        }
    }

    #[test]
    fn test_discover_filters_disabled() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("spell.toml"), "").unwrap();
        std::fs::write(tmp.path().join("welcome.toml"), "").unwrap();

        let scheduler =
            PluginScheduler::new(vec![tmp.path().to_path_buf()], FakeImporter::default())
                .with_disabled(["welcome".to_string()]);
        let names: Vec<String> = scheduler
            .discover()
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["spell"]);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }
}
