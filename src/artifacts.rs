//! Filesystem artifact store: one directory per circuit, four artifact files

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};
use crate::types::ArtifactPresence;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Circuit names become directory names, so only `[A-Za-z0-9_-]+` is allowed.
pub fn is_valid_circuit_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    ConstraintSystem,
    WitnessProgram,
    ProvingKey,
    VerificationKey,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::ConstraintSystem,
        ArtifactKind::WitnessProgram,
        ArtifactKind::ProvingKey,
        ArtifactKind::VerificationKey,
    ];

    pub fn file_name(&self, circuit: &str) -> String {
        match self {
            ArtifactKind::ConstraintSystem => format!("{}.r1cs", circuit),
            ArtifactKind::WitnessProgram => format!("{}.wasm", circuit),
            ArtifactKind::ProvingKey => format!("{}_final.zkey", circuit),
            ArtifactKind::VerificationKey => "verification_key.json".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn circuit_dir(&self, circuit: &str) -> PathBuf {
        self.root.join(circuit)
    }

    pub fn path(&self, circuit: &str, kind: ArtifactKind) -> PathBuf {
        self.circuit_dir(circuit).join(kind.file_name(circuit))
    }

    /// Check one artifact. A missing file is `Ok(false)`; any other I/O
    /// failure is an `ArtifactProbe` error.
    pub fn exists(&self, circuit: &str, kind: ArtifactKind) -> Result<bool> {
        let path = self.path(circuit, kind);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ServiceError::ArtifactProbe { path, source }),
        }
    }

    /// Probe all four artifacts. Probe errors count as absent.
    pub fn presence(&self, circuit: &str) -> ArtifactPresence {
        if !is_valid_circuit_name(circuit) {
            warn!("Refusing to probe invalid circuit name {:?}", circuit);
            return ArtifactPresence::default();
        }

        let check = |kind| match self.exists(circuit, kind) {
            Ok(found) => found,
            Err(e) => {
                warn!("Treating artifact as absent: {}", e);
                false
            }
        };

        let presence = ArtifactPresence {
            constraint_system: check(ArtifactKind::ConstraintSystem),
            witness_program: check(ArtifactKind::WitnessProgram),
            proving_key: check(ArtifactKind::ProvingKey),
            verification_key: check(ArtifactKind::VerificationKey),
        };
        debug!("Probed {}: {:?}", circuit, presence);
        presence
    }

    pub fn ensure_dir(&self, circuit: &str) -> io::Result<PathBuf> {
        if !is_valid_circuit_name(circuit) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid circuit name {:?}", circuit),
            ));
        }
        let dir = self.circuit_dir(circuit);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write an artifact under a temporary name, sync it, then rename it
    /// into place. Readers see either the old file or the complete new one.
    pub fn write_atomic(&self, circuit: &str, kind: ArtifactKind, bytes: &[u8]) -> io::Result<()> {
        let target = self.path(circuit, kind);
        let temp = self.temp_path(circuit, kind);

        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    /// Move an externally produced file into place as the given artifact.
    pub fn install_file(&self, circuit: &str, kind: ArtifactKind, produced: &Path) -> io::Result<()> {
        let target = self.path(circuit, kind);
        if fs::rename(produced, &target).is_ok() {
            return Ok(());
        }
        // Cross-device: copy to a sibling temp file first.
        let bytes = fs::read(produced)?;
        self.write_atomic(circuit, kind, &bytes)?;
        let _ = fs::remove_file(produced);
        Ok(())
    }

    /// Delete an artifact. Already absent is not an error.
    pub fn remove(&self, circuit: &str, kind: ArtifactKind) -> io::Result<()> {
        match fs::remove_file(self.path(circuit, kind)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn load_verification_key(&self, circuit: &str) -> Result<serde_json::Value> {
        let path = self.path(circuit, ArtifactKind::VerificationKey);
        let contents = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn temp_path(&self, circuit: &str, kind: ArtifactKind) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.circuit_dir(circuit).join(format!(
            ".{}.tmp-{}-{}",
            kind.file_name(circuit),
            std::process::id(),
            n
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_name_validation() {
        assert!(is_valid_circuit_name("age_verification"));
        assert!(is_valid_circuit_name("a-1"));
        assert!(!is_valid_circuit_name(""));
        assert!(!is_valid_circuit_name("../etc"));
        assert!(!is_valid_circuit_name("a/b"));
    }

    #[test]
    fn test_invalid_name_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));

        assert!(store.ensure_dir("../outside").is_err());
        assert_eq!(store.presence("../outside"), ArtifactPresence::default());
    }

    #[test]
    fn test_missing_directory_probes_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        assert_eq!(store.presence("age_verification"), ArtifactPresence::default());
        assert!(!store.exists("age_verification", ArtifactKind::ProvingKey).unwrap());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir("c").unwrap();

        store.write_atomic("c", ArtifactKind::ConstraintSystem, b"first").unwrap();
        store.write_atomic("c", ArtifactKind::ConstraintSystem, b"second").unwrap();

        let path = store.path("c", ArtifactKind::ConstraintSystem);
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let names: Vec<String> = fs::read_dir(store.circuit_dir("c"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["c.r1cs".to_string()]);
    }

    #[test]
    fn test_directory_in_place_of_file_is_not_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        fs::create_dir_all(store.path("c", ArtifactKind::WitnessProgram)).unwrap();

        assert!(!store.presence("c").witness_program);
    }

    #[test]
    fn test_probe_error_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        // A plain file where the circuit directory should be.
        fs::write(store.circuit_dir("c"), b"not a directory").unwrap();

        let err = store.exists("c", ArtifactKind::ProvingKey).unwrap_err();
        assert!(matches!(err, ServiceError::ArtifactProbe { .. }));
        assert_eq!(store.presence("c"), ArtifactPresence::default());
    }

    #[test]
    fn test_remove_tolerates_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir("c").unwrap();
        store.write_atomic("c", ArtifactKind::ProvingKey, b"zkey").unwrap();

        store.remove("c", ArtifactKind::ProvingKey).unwrap();
        store.remove("c", ArtifactKind::ProvingKey).unwrap();
        assert!(!store.exists("c", ArtifactKind::ProvingKey).unwrap());
    }

    #[test]
    fn test_install_file_moves_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));
        store.ensure_dir("c").unwrap();

        let produced = dir.path().join("out.zkey");
        fs::write(&produced, b"zkey").unwrap();
        store.install_file("c", ArtifactKind::ProvingKey, &produced).unwrap();

        assert!(!produced.exists());
        assert!(store.exists("c", ArtifactKind::ProvingKey).unwrap());
    }

    #[tokio::test]
    async fn test_load_verification_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_dir("c").unwrap();
        store
            .write_atomic("c", ArtifactKind::VerificationKey, br#"{"protocol":"groth16"}"#)
            .unwrap();

        let vkey = store.load_verification_key("c").await.unwrap();
        assert_eq!(vkey["protocol"], "groth16");
    }
}
