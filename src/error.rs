//! Error types for the attestation service

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Artifact probe failed for {path}: {source}")]
    ArtifactProbe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build of circuit {circuit_name} failed: {cause}")]
    BuildFailure { circuit_name: String, cause: String },

    #[error("Claim encoding error: {0}")]
    Claim(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn build_failure(circuit_name: &str, cause: impl std::fmt::Display) -> Self {
        ServiceError::BuildFailure {
            circuit_name: circuit_name.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Errors raised inside a proving backend. Never crosses the verify boundary.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend process failed ({status}): {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("malformed backend data: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
