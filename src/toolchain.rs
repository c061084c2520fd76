//! Artifact generation through the external circom + snarkjs toolchain

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::builder::ArtifactGenerator;
use crate::error::{Result, ServiceError};
use crate::types::ArtifactPresence;

/// Compiles `<source_dir>/<name>.circom` and runs a single-party Groth16
/// setup against a local powers-of-tau file. Not a production ceremony.
pub struct CircomToolchain {
    circom_bin: PathBuf,
    snarkjs_bin: PathBuf,
    source_dir: PathBuf,
    ptau_path: PathBuf,
}

impl CircomToolchain {
    pub fn new(
        circom_bin: impl Into<PathBuf>,
        snarkjs_bin: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
        ptau_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            circom_bin: circom_bin.into(),
            snarkjs_bin: snarkjs_bin.into(),
            source_dir: source_dir.into(),
            ptau_path: ptau_path.into(),
        }
    }

    fn compile(&self, store: &ArtifactStore, circuit: &str, work: &Path) -> Result<()> {
        let source = self.source_dir.join(format!("{}.circom", circuit));
        if !source.is_file() {
            return Err(ServiceError::build_failure(
                circuit,
                format!("circuit source {} not found", source.display()),
            ));
        }

        info!("Compiling {} with {}", source.display(), self.circom_bin.display());
        let mut cmd = Command::new(&self.circom_bin);
        cmd.arg(&source).args(["--r1cs", "--wasm", "-o"]).arg(work);
        run(circuit, &mut cmd)?;

        store.install_file(
            circuit,
            ArtifactKind::ConstraintSystem,
            &work.join(format!("{}.r1cs", circuit)),
        )?;
        store.install_file(
            circuit,
            ArtifactKind::WitnessProgram,
            &work.join(format!("{0}_js/{0}.wasm", circuit)),
        )?;
        Ok(())
    }

    fn setup(&self, store: &ArtifactStore, circuit: &str, work: &Path) -> Result<()> {
        if !self.ptau_path.is_file() {
            return Err(ServiceError::build_failure(
                circuit,
                format!("powers of tau file {} not found", self.ptau_path.display()),
            ));
        }

        let r1cs = store.path(circuit, ArtifactKind::ConstraintSystem);
        let zkey = work.join(format!("{}_final.zkey", circuit));
        let vkey = work.join("verification_key.json");

        info!("Running groth16 setup for {}", circuit);
        let mut setup = Command::new(&self.snarkjs_bin);
        setup
            .args(["groth16", "setup"])
            .arg(&r1cs)
            .arg(&self.ptau_path)
            .arg(&zkey);
        run(circuit, &mut setup)?;

        let mut export = Command::new(&self.snarkjs_bin);
        export
            .args(["zkey", "export", "verificationkey"])
            .arg(&zkey)
            .arg(&vkey);
        run(circuit, &mut export)?;

        // The verification key is only installed once the proving key is.
        store.install_file(circuit, ArtifactKind::ProvingKey, &zkey)?;
        store.install_file(circuit, ArtifactKind::VerificationKey, &vkey)?;
        Ok(())
    }
}

impl ArtifactGenerator for CircomToolchain {
    fn generate(&self, store: &ArtifactStore, circuit: &str, present: ArtifactPresence) -> Result<()> {
        let recompile = !(present.constraint_system && present.witness_program);
        // Keys from an older constraint system are useless after a recompile.
        let resetup = recompile || !(present.proving_key && present.verification_key);

        let work = store.circuit_dir(circuit).join(".work");
        fs::create_dir_all(&work)?;

        let result = (|| -> Result<()> {
            if recompile {
                // Stale keys must not outlive a failed setup and pass as ready.
                store.remove(circuit, ArtifactKind::VerificationKey)?;
                store.remove(circuit, ArtifactKind::ProvingKey)?;
                self.compile(store, circuit, &work)?;
            }
            if resetup {
                self.setup(store, circuit, &work)?;
            }
            Ok(())
        })();

        if let Err(e) = fs::remove_dir_all(&work) {
            debug!("Could not remove work dir {}: {}", work.display(), e);
        }
        result
    }
}

fn run(circuit: &str, cmd: &mut Command) -> Result<()> {
    let program = cmd.get_program().to_owned();
    debug!("Running {:?} {:?}", program, cmd.get_args().collect::<Vec<&OsStr>>());

    let output = cmd.output().map_err(|e| {
        ServiceError::build_failure(circuit, format!("failed to start {:?}: {}", program, e))
    })?;

    if !output.status.success() {
        return Err(ServiceError::build_failure(
            circuit,
            format!(
                "{:?} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));
        store.ensure_dir("age_verification").unwrap();

        let toolchain = CircomToolchain::new("circom", "snarkjs", dir.path(), dir.path().join("pot.ptau"));
        let err = toolchain
            .generate(&store, "age_verification", ArtifactPresence::default())
            .unwrap_err();

        assert!(err.to_string().contains("not found"));
        assert!(!store.circuit_dir("age_verification").join(".work").exists());
    }

    #[test]
    fn test_missing_compiler_is_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.circom"), "pragma circom 2.0.0;").unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));
        store.ensure_dir("c").unwrap();

        let toolchain = CircomToolchain::new(
            dir.path().join("no-such-circom"),
            "snarkjs",
            dir.path(),
            dir.path().join("pot.ptau"),
        );
        let err = toolchain.generate(&store, "c", ArtifactPresence::default()).unwrap_err();

        assert!(matches!(err, ServiceError::BuildFailure { ref circuit_name, .. } if circuit_name == "c"));
        assert_eq!(store.presence("c"), ArtifactPresence::default());
    }

    #[test]
    fn test_compiled_circuit_skips_straight_to_setup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));
        store.ensure_dir("c").unwrap();
        store.write_atomic("c", ArtifactKind::ConstraintSystem, b"r1cs").unwrap();
        store.write_atomic("c", ArtifactKind::WitnessProgram, b"wasm").unwrap();

        // No source file exists, so reaching compile() would report it.
        let toolchain = CircomToolchain::new("circom", "snarkjs", dir.path(), dir.path().join("pot.ptau"));
        let present = store.presence("c");
        let err = toolchain.generate(&store, "c", present).unwrap_err();

        assert!(err.to_string().contains("powers of tau"));
    }

    /// Stand-in for circom: writes `<out>/<name>.r1cs` and the wasm.
    #[cfg(unix)]
    fn fake_circom(dir: &Path, circuit: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-circom");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nout=\"$5\"\nmkdir -p \"$out/{0}_js\"\necho new-r1cs > \"$out/{0}.r1cs\"\necho new-wasm > \"$out/{0}_js/{0}.wasm\"\n",
                circuit
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_setup_after_recompile_drops_stale_keys() {
        use crate::builder::CircuitBuilder;
        use crate::registry::CircuitRegistry;
        use crate::types::CircuitState;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.circom"), "pragma circom 2.0.0;").unwrap();
        let store = ArtifactStore::new(dir.path().join("build"));
        store.ensure_dir("c").unwrap();
        store.write_atomic("c", ArtifactKind::WitnessProgram, b"old wasm").unwrap();
        store.write_atomic("c", ArtifactKind::ProvingKey, b"old zkey").unwrap();
        store.write_atomic("c", ArtifactKind::VerificationKey, b"{}").unwrap();

        let toolchain = CircomToolchain::new(
            fake_circom(dir.path(), "c"),
            "snarkjs",
            dir.path(),
            dir.path().join("missing.ptau"),
        );
        let registry = Arc::new(CircuitRegistry::new(store.clone()));
        let builder = CircuitBuilder::new(Arc::clone(&registry), Arc::new(toolchain));

        let err = builder.build("c").await.unwrap_err();
        assert!(err.to_string().contains("powers of tau"));

        let info = registry.probe("c");
        assert_eq!(info.state(), CircuitState::CompiledOnly);
        assert!(!registry.is_ready("c"));
        assert!(!store.exists("c", ArtifactKind::ProvingKey).unwrap());

        // A retry still attempts the setup instead of reporting ready.
        assert!(builder.build("c").await.is_err());
        assert_eq!(
            fs::read(store.path("c", ArtifactKind::WitnessProgram)).unwrap(),
            b"new-wasm\n"
        );
    }
}
