//! Configuration management for the attestation service

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::artifacts::is_valid_circuit_name;
use crate::claims::KNOWN_CIRCUITS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding one artifact directory per circuit
    pub artifact_root: PathBuf,

    /// Directory holding `<name>.circom` sources for the toolchain
    pub circuit_source_dir: PathBuf,

    /// Circuits managed by `build` and reported by `status`
    pub circuits: Vec<String>,

    /// snarkjs executable
    pub snarkjs_bin: PathBuf,

    /// circom executable
    pub circom_bin: PathBuf,

    /// Powers-of-tau file for the groth16 setup
    pub ptau_path: PathBuf,

    /// Build with circom/snarkjs instead of placeholder artifacts
    pub use_toolchain: bool,

    /// Proof generation timeout in seconds
    pub prove_timeout_secs: u64,

    /// Accept the constant citizenship validity stub
    pub citizenship_validity_stub: bool,

    /// Port for the health/status endpoint
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("circuits/build"),
            circuit_source_dir: PathBuf::from("circuits"),
            circuits: KNOWN_CIRCUITS.iter().map(|c| c.to_string()).collect(),
            snarkjs_bin: PathBuf::from("snarkjs"),
            circom_bin: PathBuf::from("circom"),
            ptau_path: PathBuf::from("circuits/pot12_final.ptau"),
            use_toolchain: false,
            prove_timeout_secs: 60,
            citizenship_validity_stub: true,
            health_port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(root) = env::var("ZK_ARTIFACT_ROOT") {
            self.artifact_root = PathBuf::from(root);
        }

        if let Ok(dir) = env::var("ZK_CIRCUIT_SOURCE_DIR") {
            self.circuit_source_dir = PathBuf::from(dir);
        }

        if let Ok(names) = env::var("ZK_CIRCUITS") {
            self.circuits = names
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(bin) = env::var("ZK_SNARKJS_BIN") {
            self.snarkjs_bin = PathBuf::from(bin);
        }

        if let Ok(bin) = env::var("ZK_CIRCOM_BIN") {
            self.circom_bin = PathBuf::from(bin);
        }

        if let Ok(path) = env::var("ZK_PTAU_PATH") {
            self.ptau_path = PathBuf::from(path);
        }

        if let Some(flag) = env_flag("ZK_USE_TOOLCHAIN") {
            self.use_toolchain = flag;
        }

        if let Ok(timeout) = env::var("ZK_PROVE_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.prove_timeout_secs = secs;
            }
        }

        if let Some(flag) = env_flag("ZK_CITIZENSHIP_VALIDITY_STUB") {
            self.citizenship_validity_stub = flag;
        }

        if let Ok(port) = env::var("ZK_HEALTH_PORT") {
            if let Ok(port) = port.parse() {
                self.health_port = port;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.circuits.is_empty() {
            return Err(anyhow::anyhow!("At least one circuit is required"));
        }

        if let Some(bad) = self.circuits.iter().find(|c| !is_valid_circuit_name(c)) {
            return Err(anyhow::anyhow!(
                "Invalid circuit name {:?}: only letters, digits, '_' and '-' are allowed",
                bad
            ));
        }

        if self.prove_timeout_secs == 0 {
            return Err(anyhow::anyhow!("prove_timeout_secs must be greater than zero"));
        }

        Ok(())
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
