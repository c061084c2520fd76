//! Circuit builder: produces missing artifacts, one writer per circuit name

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::error::{Result, ServiceError};
use crate::registry::CircuitRegistry;
use crate::types::{ArtifactPresence, CircuitInfo};

/// Produces the artifact files of a circuit.
///
/// Called on the blocking pool with the circuit directory already created.
/// Implementations must write through [`ArtifactStore::write_atomic`] or
/// [`ArtifactStore::install_file`] so that no torn file is ever visible.
pub trait ArtifactGenerator: Send + Sync {
    fn generate(&self, store: &ArtifactStore, circuit: &str, present: ArtifactPresence) -> Result<()>;
}

/// Writes JSON placeholder artifacts for every missing file.
///
/// Placeholders make the lifecycle exercisable without the circuit
/// toolchain. A real backend cannot prove against them, so proof requests
/// for such circuits degrade to mock proofs.
pub struct PlaceholderGenerator;

impl ArtifactGenerator for PlaceholderGenerator {
    fn generate(&self, store: &ArtifactStore, circuit: &str, present: ArtifactPresence) -> Result<()> {
        let missing = [
            (ArtifactKind::ConstraintSystem, present.constraint_system, "r1cs"),
            (ArtifactKind::WitnessProgram, present.witness_program, "wasm"),
            (ArtifactKind::ProvingKey, present.proving_key, "zkey"),
            (ArtifactKind::VerificationKey, present.verification_key, "vkey"),
        ];

        for (kind, exists, artifact) in missing {
            if exists {
                continue;
            }
            let body = json!({
                "placeholder": true,
                "circuit": circuit,
                "artifact": artifact,
                "protocol": "groth16",
                "curve": "bn128",
            });
            store.write_atomic(circuit, kind, &serde_json::to_vec_pretty(&body)?)?;
            debug!("Wrote placeholder {} for {}", artifact, circuit);
        }
        Ok(())
    }
}

/// Outcome of a batch build.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<CircuitInfo>,
    pub failed: Vec<ServiceError>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CircuitBuilder {
    registry: Arc<CircuitRegistry>,
    generator: Arc<dyn ArtifactGenerator>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CircuitBuilder {
    pub fn new(registry: Arc<CircuitRegistry>, generator: Arc<dyn ArtifactGenerator>) -> Self {
        Self {
            registry,
            generator,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build `name` until all four artifacts exist.
    ///
    /// Idempotent: a circuit that probes ready is left untouched. Concurrent
    /// calls for the same name are serialized; different names run in
    /// parallel. The file work runs on the blocking pool and holds the
    /// per-name lock until it finishes, even if the caller stops waiting.
    pub async fn build(&self, name: &str) -> Result<CircuitInfo> {
        let guard = self.lock_for(name).lock_owned().await;

        let registry = Arc::clone(&self.registry);
        let generator = Arc::clone(&self.generator);
        let owned_name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            build_blocking(&registry, generator.as_ref(), &owned_name)
        })
        .await
        .map_err(|e| ServiceError::build_failure(name, e))?
    }

    /// Build every circuit in order. A failure is recorded and logged but
    /// does not stop the remaining builds.
    pub async fn build_all(&self, names: &[String]) -> BuildReport {
        let mut report = BuildReport::default();

        for name in names {
            match self.build(name).await {
                Ok(info) => report.built.push(info),
                Err(e) => {
                    error!("Failed to build circuit {}: {}", name, e);
                    report.failed.push(e);
                }
            }
        }

        info!(
            "Build finished: {} ready, {} failed",
            report.built.len(),
            report.failed.len()
        );
        report
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

fn build_blocking(
    registry: &CircuitRegistry,
    generator: &dyn ArtifactGenerator,
    name: &str,
) -> Result<CircuitInfo> {
    let before = registry.probe(name);
    if before.ready() {
        debug!("Circuit {} already ready, skipping build", name);
        return Ok(before);
    }

    info!("Building circuit {} (currently {})", name, before.state());
    let store = registry.store();
    let outcome = store
        .ensure_dir(name)
        .map_err(|e| ServiceError::build_failure(name, e))
        .and_then(|_| {
            let present = store.presence(name);
            generator
                .generate(store, name, present)
                .map_err(|e| match e {
                    ServiceError::BuildFailure { .. } => e,
                    other => ServiceError::build_failure(name, other),
                })
        });

    // Refresh even on failure so the registry reflects whatever did land.
    let after = registry.probe(name);
    outcome?;

    if !after.ready() {
        return Err(ServiceError::build_failure(
            name,
            format!("artifacts still incomplete after build ({})", after.state()),
        ));
    }

    info!("Circuit {} is ready", name);
    Ok(after)
}
