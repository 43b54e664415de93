//! Summary of one plugin loading run.

use std::collections::BTreeMap;
use std::fmt;

use super::graph::CycleError;

/// What happened to one discovered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Imported and set up successfully.
    Loaded,
    /// Could not be imported; never entered the dependency graph.
    ImportFailed(String),
    /// Imported and ordered, but `setup()` failed or panicked.
    InitFailed(String),
    /// Part of, or blocked behind, a dependency cycle; never set up.
    SkippedCycle,
}

impl UnitOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, UnitOutcome::Loaded)
    }

    /// Failure detail for import and setup failures.
    pub fn detail(&self) -> Option<&str> {
        match self {
            UnitOutcome::ImportFailed(detail) | UnitOutcome::InitFailed(detail) => Some(detail),
            UnitOutcome::Loaded | UnitOutcome::SkippedCycle => None,
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Loaded => write!(f, "loaded"),
            UnitOutcome::ImportFailed(detail) => write!(f, "import failed: {detail}"),
            UnitOutcome::InitFailed(detail) => write!(f, "setup failed: {detail}"),
            UnitOutcome::SkippedCycle => write!(f, "skipped (dependency cycle)"),
        }
    }
}

/// Result of [`PluginScheduler::load`](super::PluginScheduler::load).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub(crate) discovered: Vec<String>,
    pub(crate) outcomes: BTreeMap<String, UnitOutcome>,
    pub(crate) order: Vec<String>,
    pub(crate) cycle: Option<CycleError>,
}

impl LoadReport {
    /// Names of every unit handed to the scheduler, sorted.
    pub fn discovered(&self) -> &[String] {
        &self.discovered
    }

    /// The order in which setup was attempted.
    pub fn load_order(&self) -> &[String] {
        &self.order
    }

    /// The cycle found while ordering, if any.
    pub fn cycle(&self) -> Option<&CycleError> {
        self.cycle.as_ref()
    }

    pub fn outcome(&self, name: &str) -> Option<&UnitOutcome> {
        self.outcomes.get(name)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &UnitOutcome)> {
        self.outcomes.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Successfully set up plugins, in load order.
    pub fn loaded(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.outcomes.get(*name).is_some_and(UnitOutcome::is_loaded))
            .map(String::as_str)
            .collect()
    }

    /// Plugins that failed to import or set up, by name.
    pub fn failed(&self) -> Vec<(&str, &UnitOutcome)> {
        self.outcomes()
            .filter(|(_, outcome)| outcome.detail().is_some())
            .collect()
    }

    /// Plugins skipped because of a dependency cycle, by name.
    pub fn skipped(&self) -> Vec<&str> {
        self.outcomes()
            .filter(|(_, outcome)| **outcome == UnitOutcome::SkippedCycle)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report() -> LoadReport {
        let outcomes = [
            ("b", UnitOutcome::Loaded),
            ("a", UnitOutcome::Loaded),
            ("bad", UnitOutcome::ImportFailed("no entry".into())),
            ("boom", UnitOutcome::InitFailed("panicked: oops".into())),
            ("x", UnitOutcome::SkippedCycle),
        ];
        LoadReport {
            discovered: vec!["a".into(), "b".into(), "bad".into(), "boom".into(), "x".into()],
            outcomes: outcomes
                .into_iter()
                .map(|(name, outcome)| (name.to_string(), outcome))
                .collect(),
            order: vec!["b".into(), "boom".into(), "a".into()],
            cycle: None,
        }
    }

    #[test]
    fn test_loaded_follows_load_order() {
        assert_eq!(report().loaded(), vec!["b", "a"]);
    }

    #[test]
    fn test_failed_and_skipped() {
        let report = report();
        let failed: Vec<&str> = report.failed().into_iter().map(|(name, _)| name).collect();
        assert_eq!(failed, vec!["bad", "boom"]);
        assert_eq!(report.skipped(), vec!["x"]);
    }

    #[test]
    fn test_outcome_display() {
        let report = report();
        assert_eq!(report.outcome("a").unwrap().to_string(), "loaded");
        assert_eq!(
            report.outcome("bad").unwrap().to_string(),
            "import failed: no entry"
        );
        assert_eq!(
            report.outcome("x").unwrap().to_string(),
            "skipped (dependency cycle)"
        );
        assert!(report.outcome("missing").is_none());
    }
}
