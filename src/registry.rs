//! Circuit registry: cached readiness, always recomputed from a fresh probe

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;

use crate::artifacts::ArtifactStore;
use crate::types::CircuitInfo;

pub struct CircuitRegistry {
    store: ArtifactStore,
    entries: RwLock<HashMap<String, CircuitInfo>>,
}

impl CircuitRegistry {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Stat the artifacts of `name` and overwrite its entry. Never fails.
    pub fn probe(&self, name: &str) -> CircuitInfo {
        let info = CircuitInfo::from_presence(name, self.store.presence(name));
        debug!("Circuit {} is {}", name, info.state());

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(name.to_string(), info.clone());
        info
    }

    /// Cached readiness, probing first when the circuit was never seen.
    pub fn is_ready(&self, name: &str) -> bool {
        self.info(name).ready()
    }

    /// Cached entry, probing first when the circuit was never seen.
    pub fn info(&self, name: &str) -> CircuitInfo {
        let cached = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(name).cloned()
        };
        match cached {
            Some(info) => info,
            None => self.probe(name),
        }
    }

    pub fn all_statuses(&self) -> BTreeMap<String, CircuitInfo> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;

    fn write_all(store: &ArtifactStore, name: &str) {
        store.ensure_dir(name).unwrap();
        for kind in ArtifactKind::ALL {
            store.write_atomic(name, kind, b"{}").unwrap();
        }
    }

    #[test]
    fn test_unprobed_circuit_is_probed_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CircuitRegistry::new(ArtifactStore::new(dir.path()));

        assert!(registry.all_statuses().is_empty());
        assert!(!registry.is_ready("age_verification"));
        assert!(registry.all_statuses().contains_key("age_verification"));
    }

    #[test]
    fn test_ready_matches_disk_after_probe() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let registry = CircuitRegistry::new(store.clone());

        write_all(&store, "c");
        assert!(registry.probe("c").ready());
        assert!(registry.is_ready("c"));
    }

    #[test]
    fn test_state_moves_backward_when_artifact_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let registry = CircuitRegistry::new(store.clone());

        write_all(&store, "c");
        assert!(registry.probe("c").ready());

        std::fs::remove_file(store.path("c", ArtifactKind::ProvingKey)).unwrap();
        // The cache is unchanged until the next probe.
        assert!(registry.is_ready("c"));

        let info = registry.probe("c");
        assert!(!info.ready());
        assert!(info.compiled());
        assert!(!registry.is_ready("c"));
    }
}
