//! Proof service: readiness-gated proving with tagged mock fallback

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::backend::{BackendProof, MockBackend, ProveJob, ProvingBackend, SnarkjsBackend};
use crate::builder::{ArtifactGenerator, BuildReport, CircuitBuilder, PlaceholderGenerator};
use crate::claims::{self, CitizenshipValidity, AGE_CIRCUIT, CITIZENSHIP_CIRCUIT};
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::registry::CircuitRegistry;
use crate::toolchain::CircomToolchain;
use crate::types::{CircuitInfo, CircuitState, ClaimInput, DegradedReason, ProofSource, ZkProof};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub circuits: Vec<String>,
    pub prove_timeout: Duration,
    pub citizenship_validity_stub: bool,
}

pub struct ProofService {
    registry: Arc<CircuitRegistry>,
    builder: CircuitBuilder,
    backend: Arc<dyn ProvingBackend>,
    mock: MockBackend,
    options: ServiceOptions,
}

impl ProofService {
    pub fn new(
        store: ArtifactStore,
        generator: Arc<dyn ArtifactGenerator>,
        backend: Arc<dyn ProvingBackend>,
        options: ServiceOptions,
    ) -> Self {
        let registry = Arc::new(CircuitRegistry::new(store));
        let builder = CircuitBuilder::new(Arc::clone(&registry), generator);
        Self {
            registry,
            builder,
            backend,
            mock: MockBackend,
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let generator: Arc<dyn ArtifactGenerator> = if config.use_toolchain {
            Arc::new(CircomToolchain::new(
                &config.circom_bin,
                &config.snarkjs_bin,
                &config.circuit_source_dir,
                &config.ptau_path,
            ))
        } else {
            Arc::new(PlaceholderGenerator)
        };

        Self::new(
            ArtifactStore::new(&config.artifact_root),
            generator,
            Arc::new(SnarkjsBackend::new(&config.snarkjs_bin)),
            ServiceOptions {
                circuits: config.circuits.clone(),
                prove_timeout: Duration::from_secs(config.prove_timeout_secs),
                citizenship_validity_stub: config.citizenship_validity_stub,
            },
        )
    }

    pub fn registry(&self) -> &CircuitRegistry {
        &self.registry
    }

    /// Prove `input` against `circuit`.
    ///
    /// Always returns an envelope. When the circuit is not ready, or the
    /// backend fails or times out, the envelope holds a deterministic mock
    /// proof tagged `ProofSource::Mock` with the reason.
    pub async fn generate_proof(&self, circuit: &str, input: ClaimInput) -> ZkProof {
        if let Some(signals) = claims::declared_signals(circuit) {
            for signal in signals.iter().filter(|s| input.get(s).is_none()) {
                warn!("Input for {} is missing signal {}", circuit, signal);
            }
        }

        if !self.is_configured(circuit) {
            warn!("Rejecting proof request for unconfigured circuit {:?}", circuit);
            return self.degraded(
                circuit,
                &input,
                DegradedReason::NotReady { state: CircuitState::NotCompiled },
            );
        }

        let info = self.circuit_info(circuit).await;
        if !info.ready() {
            return self.degraded(circuit, &input, DegradedReason::NotReady { state: info.state() });
        }

        let store = self.registry.store();
        let job = ProveJob {
            circuit: circuit.to_string(),
            witness_program: store.path(circuit, ArtifactKind::WitnessProgram),
            proving_key: store.path(circuit, ArtifactKind::ProvingKey),
            input,
        };

        debug!("Proving {} with {}", circuit, self.backend.name());
        let outcome = match timeout(self.options.prove_timeout, self.backend.prove(&job)).await {
            Err(_) => Err(DegradedReason::Timeout {
                millis: self.options.prove_timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(DegradedReason::BackendFailed {
                message: e.to_string(),
            }),
            Ok(Ok(proof)) => store
                .load_verification_key(circuit)
                .await
                .map(|vkey| (proof, vkey))
                .map_err(|e| DegradedReason::BackendFailed {
                    message: format!("verification key unreadable: {}", e),
                }),
        };

        match outcome {
            Ok((BackendProof { proof, public_signals }, verification_key)) => {
                info!("Generated {} proof for {}", self.backend.name(), circuit);
                ZkProof {
                    proof,
                    public_signals,
                    verification_key,
                    provenance: ProofSource::Backend,
                }
            }
            Err(reason) => self.degraded(circuit, &job.input, reason),
        }
    }

    /// Prove an age claim evaluated against today's date (UTC).
    pub async fn generate_age_proof(
        &self,
        date_of_birth: NaiveDate,
        minimum_age: u32,
        salt: &str,
    ) -> Result<ZkProof> {
        let today = Utc::now().date_naive();
        let input = claims::encode_age_claim(date_of_birth, minimum_age, salt, today)?;
        Ok(self.generate_proof(AGE_CIRCUIT, input).await)
    }

    pub async fn generate_citizenship_proof(
        &self,
        citizenship_number: &str,
        issue_date: NaiveDate,
        salt: &str,
        validity: CitizenshipValidity,
    ) -> Result<ZkProof> {
        let input = claims::encode_citizenship_claim(
            citizenship_number,
            issue_date,
            salt,
            validity,
            self.options.citizenship_validity_stub,
        )?;
        Ok(self.generate_proof(CITIZENSHIP_CIRCUIT, input).await)
    }

    /// Check a proof with the real backend. Anything short of a positive
    /// verdict, including backend errors, is `false`.
    pub async fn verify_proof(
        &self,
        proof: &Value,
        public_signals: &[String],
        verification_key: &Value,
    ) -> bool {
        match self
            .backend
            .verify(proof, public_signals, verification_key)
            .await
        {
            Ok(valid) => {
                debug!("Verification verdict: {}", valid);
                valid
            }
            Err(e) => {
                warn!("Verification failed closed: {}", e);
                false
            }
        }
    }

    /// Verify an envelope. Mock envelopes are rejected without consulting
    /// the backend.
    pub async fn verify_envelope(&self, envelope: &ZkProof) -> bool {
        if let Some(reason) = envelope.degraded_reason() {
            debug!("Rejecting mock proof ({})", reason);
            return false;
        }
        self.verify_proof(&envelope.proof, &envelope.public_signals, &envelope.verification_key)
            .await
    }

    /// Build every configured circuit; failures do not stop the others.
    pub async fn build_circuits(&self) -> BuildReport {
        self.builder.build_all(&self.options.circuits).await
    }

    /// Build one configured circuit. Other names are refused.
    pub async fn build_circuit(&self, name: &str) -> Result<CircuitInfo> {
        if !self.is_configured(name) {
            return Err(ServiceError::build_failure(name, "not a configured circuit"));
        }
        self.builder.build(name).await
    }

    /// Run [`Self::build_circuits`] as a background task.
    pub fn spawn_build(self: &Arc<Self>) -> JoinHandle<BuildReport> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.build_circuits().await })
    }

    /// Fresh probe of every configured circuit, run on the blocking pool.
    pub async fn get_build_status(&self) -> BTreeMap<String, CircuitInfo> {
        let registry = Arc::clone(&self.registry);
        let circuits = self.options.circuits.clone();

        let probed = tokio::task::spawn_blocking(move || {
            for circuit in &circuits {
                registry.probe(circuit);
            }
            registry
                .all_statuses()
                .into_iter()
                .filter(|(name, _)| circuits.contains(name))
                .collect::<BTreeMap<_, _>>()
        })
        .await;

        probed.unwrap_or_else(|e| {
            warn!("Status probe task failed: {}", e);
            BTreeMap::new()
        })
    }

    fn is_configured(&self, circuit: &str) -> bool {
        self.options.circuits.iter().any(|c| c == circuit)
    }

    /// Cached registry entry; a first probe stats files off the runtime.
    async fn circuit_info(&self, circuit: &str) -> CircuitInfo {
        let registry = Arc::clone(&self.registry);
        let name = circuit.to_string();

        match tokio::task::spawn_blocking(move || registry.info(&name)).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Probe of {} failed: {}", circuit, e);
                CircuitInfo::from_presence(circuit, Default::default())
            }
        }
    }

    fn degraded(&self, circuit: &str, input: &ClaimInput, reason: DegradedReason) -> ZkProof {
        warn!("Proof for {} degraded to mock: {}", circuit, reason);
        let BackendProof { proof, public_signals } = self.mock.prove(circuit, input);
        ZkProof {
            proof,
            public_signals,
            verification_key: self.mock.verification_key(circuit),
            provenance: ProofSource::Mock { reason },
        }
    }
}
