//! Proving backends: snarkjs (real) and a deterministic mock

use async_trait::async_trait;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::debug;

use crate::claims::field_hash;
use crate::error::BackendError;
use crate::types::ClaimInput;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything a backend needs to prove one claim.
#[derive(Debug, Clone)]
pub struct ProveJob {
    pub circuit: String,
    pub witness_program: PathBuf,
    pub proving_key: PathBuf,
    pub input: ClaimInput,
}

/// Proof and public signals as produced by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendProof {
    pub proof: Value,
    pub public_signals: Vec<String>,
}

#[async_trait]
pub trait ProvingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prove(&self, job: &ProveJob) -> Result<BackendProof, BackendError>;

    /// `Ok(false)` for a well-formed but invalid proof; `Err` when the
    /// backend could not reach a verdict.
    async fn verify(
        &self,
        proof: &Value,
        public_signals: &[String],
        verification_key: &Value,
    ) -> Result<bool, BackendError>;
}

/// Groth16 through the `snarkjs` command line.
pub struct SnarkjsBackend {
    snarkjs_bin: PathBuf,
}

impl SnarkjsBackend {
    pub fn new(snarkjs_bin: impl Into<PathBuf>) -> Self {
        Self {
            snarkjs_bin: snarkjs_bin.into(),
        }
    }

    async fn run(&self, args: &[&Path]) -> Result<(bool, String, String), BackendError> {
        let output = Command::new(&self.snarkjs_bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackendError::Unavailable(format!("{}: {}", self.snarkjs_bin.display(), e))
            })?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

#[async_trait]
impl ProvingBackend for SnarkjsBackend {
    fn name(&self) -> &'static str {
        "snarkjs"
    }

    async fn prove(&self, job: &ProveJob) -> Result<BackendProof, BackendError> {
        let scratch = ScratchDir::create().await?;
        let input = scratch.file("input.json");
        let proof = scratch.file("proof.json");
        let public = scratch.file("public.json");

        tokio::fs::write(&input, serde_json::to_vec(&job.input)?).await?;

        debug!("snarkjs fullprove for {}", job.circuit);
        let (ok, _stdout, stderr) = self
            .run(&[
                Path::new("groth16"),
                Path::new("fullprove"),
                input.as_path(),
                job.witness_program.as_path(),
                job.proving_key.as_path(),
                proof.as_path(),
                public.as_path(),
            ])
            .await?;
        if !ok {
            return Err(BackendError::ProcessFailed {
                status: "fullprove".to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let proof: Value = serde_json::from_slice(&tokio::fs::read(&proof).await?)?;
        let public_signals: Vec<String> = serde_json::from_slice(&tokio::fs::read(&public).await?)?;
        Ok(BackendProof {
            proof,
            public_signals,
        })
    }

    async fn verify(
        &self,
        proof: &Value,
        public_signals: &[String],
        verification_key: &Value,
    ) -> Result<bool, BackendError> {
        check_shape(proof, public_signals, verification_key)?;

        let scratch = ScratchDir::create().await?;
        let vkey_path = scratch.file("verification_key.json");
        let public_path = scratch.file("public.json");
        let proof_path = scratch.file("proof.json");
        tokio::fs::write(&vkey_path, serde_json::to_vec(verification_key)?).await?;
        tokio::fs::write(&public_path, serde_json::to_vec(public_signals)?).await?;
        tokio::fs::write(&proof_path, serde_json::to_vec(proof)?).await?;

        let (ok, stdout, stderr) = self
            .run(&[
                Path::new("groth16"),
                Path::new("verify"),
                vkey_path.as_path(),
                public_path.as_path(),
                proof_path.as_path(),
            ])
            .await?;

        if !ok {
            debug!("snarkjs rejected proof: {}", stderr.trim());
        }
        Ok(accepted(ok, &stdout))
    }
}

/// Deterministic stand-in used when the real backend cannot answer.
///
/// The proof has the groth16 shape but is derived only from a hash of
/// the circuit name and canonical input, so it proves nothing and never
/// verifies. The single public signal is the hash of the input.
pub struct MockBackend;

impl MockBackend {
    pub fn prove(&self, circuit: &str, input: &ClaimInput) -> BackendProof {
        let canonical = input.canonical_bytes();
        let seed = keccak(&[&b"mock-groth16"[..], circuit.as_bytes(), &[0u8][..], &canonical[..]]);
        let point = |label: &str| field_hash(&[&seed[..], label.as_bytes()]);

        let proof = json!({
            "pi_a": [point("a.x"), point("a.y"), "1"],
            "pi_b": [
                [point("b.x0"), point("b.x1")],
                [point("b.y0"), point("b.y1")],
                ["1", "0"]
            ],
            "pi_c": [point("c.x"), point("c.y"), "1"],
            "protocol": "groth16",
            "curve": "bn128",
        });

        BackendProof {
            proof,
            public_signals: vec![field_hash(&[&canonical[..]])],
        }
    }

    /// Verification key of the same shape snarkjs exports, derived from the
    /// circuit name.
    pub fn verification_key(&self, circuit: &str) -> Value {
        let seed = keccak(&[&b"mock-vkey"[..], circuit.as_bytes()]);
        let point = |label: &str| field_hash(&[&seed[..], label.as_bytes()]);
        let g2 = |label: &str| {
            json!([
                [point(&format!("{}.x0", label)), point(&format!("{}.x1", label))],
                [point(&format!("{}.y0", label)), point(&format!("{}.y1", label))],
                ["1", "0"]
            ])
        };

        json!({
            "protocol": "groth16",
            "curve": "bn128",
            "nPublic": 1,
            "vk_alpha_1": [point("alpha.x"), point("alpha.y"), "1"],
            "vk_beta_2": g2("beta"),
            "vk_gamma_2": g2("gamma"),
            "vk_delta_2": g2("delta"),
            "IC": [
                [point("ic0.x"), point("ic0.y"), "1"],
                [point("ic1.x"), point("ic1.y"), "1"]
            ],
        })
    }
}

/// snarkjs exits zero and prints `OK!` only for a valid proof.
fn accepted(success: bool, stdout: &str) -> bool {
    success && stdout.lines().any(|line| line.trim_end().ends_with("OK!"))
}

fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn check_shape(proof: &Value, public_signals: &[String], vkey: &Value) -> Result<(), BackendError> {
    for field in ["pi_a", "pi_b", "pi_c"] {
        if !proof.get(field).map_or(false, Value::is_array) {
            return Err(BackendError::Malformed(format!("proof is missing {}", field)));
        }
    }
    if vkey.get("protocol").and_then(Value::as_str) != Some("groth16") {
        return Err(BackendError::Malformed(
            "verification key is not a groth16 key".to_string(),
        ));
    }
    if let Some(n) = vkey.get("nPublic").and_then(Value::as_u64) {
        if n as usize != public_signals.len() {
            return Err(BackendError::Malformed(format!(
                "expected {} public signals, got {}",
                n,
                public_signals.len()
            )));
        }
    }
    Ok(())
}

/// Per-call scratch directory, removed on drop (including when the
/// owning future is cancelled by a timeout).
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create() -> Result<Self, BackendError> {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("zk-attest-{}-{}", std::process::id(), n));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(age: &str) -> ClaimInput {
        ClaimInput::new().with("age", age).with("minimum_age", "18")
    }

    #[test]
    fn test_mock_is_deterministic() {
        let a = MockBackend.prove("age_verification", &input("24"));
        let b = MockBackend.prove("age_verification", &input("24"));
        assert_eq!(
            serde_json::to_vec(&a.proof).unwrap(),
            serde_json::to_vec(&b.proof).unwrap()
        );
        assert_eq!(a.public_signals, b.public_signals);
    }

    #[test]
    fn test_mock_depends_on_input_and_circuit() {
        let base = MockBackend.prove("age_verification", &input("24"));
        let other_input = MockBackend.prove("age_verification", &input("25"));
        let other_circuit = MockBackend.prove("other", &input("24"));

        assert_ne!(base.proof, other_input.proof);
        assert_ne!(base.public_signals, other_input.public_signals);
        assert_ne!(base.proof, other_circuit.proof);
    }

    #[test]
    fn test_mock_matches_groth16_shape() {
        let mock = MockBackend.prove("c", &input("24"));
        let vkey = MockBackend.verification_key("c");

        assert_eq!(mock.public_signals.len(), 1);
        assert!(check_shape(&mock.proof, &mock.public_signals, &vkey).is_ok());
    }

    #[test]
    fn test_shape_check_rejects_malformed() {
        let vkey = MockBackend.verification_key("c");
        let signals = vec!["1".to_string()];

        assert!(check_shape(&json!({}), &signals, &vkey).is_err());
        assert!(check_shape(&json!({"pi_a": [], "pi_b": [], "pi_c": []}), &[], &vkey).is_err());
        assert!(check_shape(
            &json!({"pi_a": [], "pi_b": [], "pi_c": []}),
            &signals,
            &json!({"protocol": "plonk"})
        )
        .is_err());
    }

    #[test]
    fn test_verdict_needs_exit_status_and_marker() {
        assert!(accepted(true, "[INFO]  snarkJS: OK!\n"));
        assert!(!accepted(false, "[INFO]  snarkJS: OK!\n"));
        assert!(!accepted(true, "[ERROR] snarkJS: Invalid proof\n"));
        assert!(!accepted(true, "[INFO]  snarkJS: loading key OK\n"));
    }

    #[tokio::test]
    async fn test_missing_snarkjs_is_unavailable() {
        let backend = SnarkjsBackend::new("/nonexistent/snarkjs");
        let mock = MockBackend.prove("c", &input("24"));
        let vkey = MockBackend.verification_key("c");

        let result = backend.verify(&mock.proof, &mock.public_signals, &vkey).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));

        let job = ProveJob {
            circuit: "c".to_string(),
            witness_program: PathBuf::from("c.wasm"),
            proving_key: PathBuf::from("c_final.zkey"),
            input: input("24"),
        };
        assert!(backend.prove(&job).await.is_err());
    }
}
