//! Type definitions for the attestation service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw presence of the four artifact files of one circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactPresence {
    pub constraint_system: bool,
    pub witness_program: bool,
    pub proving_key: bool,
    pub verification_key: bool,
}

/// Readiness of one circuit as last observed on disk.
///
/// `compiled`, `set_up` and `ready` are derived from the raw flags at
/// construction and have no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitInfo {
    name: String,
    has_constraint_system: bool,
    has_witness_program: bool,
    has_proving_key: bool,
    has_verification_key: bool,
    compiled: bool,
    set_up: bool,
    ready: bool,
}

impl CircuitInfo {
    pub fn from_presence(name: &str, presence: ArtifactPresence) -> Self {
        let compiled = presence.constraint_system && presence.witness_program;
        let set_up = presence.proving_key && presence.verification_key;
        Self {
            name: name.to_string(),
            has_constraint_system: presence.constraint_system,
            has_witness_program: presence.witness_program,
            has_proving_key: presence.proving_key,
            has_verification_key: presence.verification_key,
            compiled,
            set_up,
            ready: compiled && set_up,
        }
    }

    pub fn compiled(&self) -> bool {
        self.compiled
    }

    pub fn set_up(&self) -> bool {
        self.set_up
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn state(&self) -> CircuitState {
        match (self.compiled, self.set_up) {
            (true, true) => CircuitState::Ready,
            (true, false) => CircuitState::CompiledOnly,
            (false, true) => CircuitState::SetUpOnly,
            (false, false) => CircuitState::NotCompiled,
        }
    }
}

/// Lifecycle state of a probed circuit. Not monotonic: it mirrors the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    NotCompiled,
    CompiledOnly,
    SetUpOnly,
    Ready,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::NotCompiled => "not_compiled",
            CircuitState::CompiledOnly => "compiled_only",
            CircuitState::SetUpOnly => "set_up_only",
            CircuitState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Circuit input signals, keyed by signal name.
///
/// Backed by an ordered map so the serialized form is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimInput(BTreeMap<String, String>);

impl ClaimInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, signal: &str, value: impl ToString) -> Self {
        self.insert(signal, value);
        self
    }

    pub fn insert(&mut self, signal: &str, value: impl ToString) {
        self.0.insert(signal.to_string(), value.to_string());
    }

    pub fn get(&self, signal: &str) -> Option<&str> {
        self.0.get(signal).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Canonical JSON bytes (sorted keys, compact).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // A string-to-string map always serializes.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }
}

/// Why a request was answered with a mock proof instead of a backend proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    /// Circuit artifacts are missing; `state` is what the probe found.
    NotReady { state: CircuitState },
    /// The proving backend returned an error.
    BackendFailed { message: String },
    /// The proving backend did not answer in time.
    Timeout { millis: u64 },
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::NotReady { state } => write!(f, "circuit not ready ({})", state),
            DegradedReason::BackendFailed { message } => write!(f, "backend failed: {}", message),
            DegradedReason::Timeout { millis } => write!(f, "backend timed out after {}ms", millis),
        }
    }
}

/// Provenance of a proof envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ProofSource {
    Backend,
    Mock { reason: DegradedReason },
}

/// Uniform proof envelope returned by the proof service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProof {
    /// Protocol-specific proof object (groth16 `pi_a`/`pi_b`/`pi_c`).
    pub proof: serde_json::Value,

    /// Public signals in the circuit's declared order.
    pub public_signals: Vec<String>,

    /// Verification key the proof checks against.
    pub verification_key: serde_json::Value,

    #[serde(flatten)]
    pub provenance: ProofSource,
}

impl ZkProof {
    pub fn is_mock(&self) -> bool {
        matches!(self.provenance, ProofSource::Mock { .. })
    }

    pub fn degraded_reason(&self) -> Option<&DegradedReason> {
        match &self.provenance {
            ProofSource::Mock { reason } => Some(reason),
            ProofSource::Backend => None,
        }
    }
}
