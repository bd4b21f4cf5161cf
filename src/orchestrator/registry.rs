//! Name-keyed probe registry, generalized from the tool registry: probes are
//! looked up by id for `--suites` filtering but iterated in registration
//! ordinal for deterministic submission and report order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::orchestrator::types::Probe;

/// Holds every probe known to this binary.
pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self {
            probes: HashMap::new(),
        }
    }

    /// Register a probe under its own id. Re-registering the same id
    /// replaces the previous entry.
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes.insert(probe.id().to_string(), probe);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Probe>> {
        self.probes.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<(u32, String)> = self
            .probes
            .values()
            .map(|p| (p.ordinal(), p.id().to_string()))
            .collect();
        ids.sort_by_key(|(ordinal, _)| *ordinal);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Resolve a `--suites` selection: `None` (or the literal `all`) selects
    /// every registered probe; otherwise only the named ids, still sorted by
    /// ordinal. Unknown ids are silently dropped — callers that want a hard
    /// error should check `ids()` membership before calling `run`.
    pub fn select(&self, requested: Option<&[String]>) -> Vec<Arc<dyn Probe>> {
        let mut selected: Vec<Arc<dyn Probe>> = match requested {
            None => self.probes.values().cloned().collect(),
            Some(ids) if ids.iter().any(|id| id == "all") => self.probes.values().cloned().collect(),
            Some(ids) => ids.iter().filter_map(|id| self.probes.get(id)).cloned().collect(),
        };
        selected.sort_by_key(|p| p.ordinal());
        selected
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
