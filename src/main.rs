//! zk-attest: proof-circuit lifecycle and proof service
//!
//! Tracks which circuits have compiled artifacts, builds missing ones,
//! encodes attribute claims into circuit inputs and produces or verifies
//! Groth16 proofs, degrading to tagged mock proofs when the circuit
//! infrastructure is unavailable.

mod artifacts;
mod backend;
mod builder;
mod claims;
mod config;
mod error;
mod registry;
mod service;
mod toolchain;
mod types;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warp::Filter;

use crate::claims::CitizenshipValidity;
use crate::config::Config;
use crate::service::ProofService;
use crate::types::{ClaimInput, ZkProof};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "zk-attest.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the health and circuit status endpoints
    Serve {
        /// Build configured circuits in the background at startup
        #[arg(long)]
        build_on_start: bool,
    },

    /// Build circuit artifacts (all configured circuits when none given)
    Build { names: Vec<String> },

    /// Print the readiness of every configured circuit
    Status,

    /// Prove an arbitrary input map read from a JSON file
    Prove {
        #[arg(long)]
        circuit: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Prove that a date of birth meets a minimum age
    ProveAge {
        /// Date of birth, YYYY-MM-DD
        #[arg(long)]
        dob: NaiveDate,
        #[arg(long)]
        min_age: u32,
        #[arg(long)]
        salt: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Prove possession of a citizenship number
    ProveCitizenship {
        #[arg(long)]
        number: String,
        /// Issue date, YYYY-MM-DD
        #[arg(long)]
        issue_date: NaiveDate,
        #[arg(long)]
        salt: String,
        /// Registry-attested validity; the configured stub is used when absent
        #[arg(long)]
        valid: Option<bool>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify a proof envelope written by one of the prove commands
    Verify {
        #[arg(long)]
        proof_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    // Initialize logging; RUST_LOG wins over --verbose
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config file {}: {}. Using environment variables.", args.config, e);
            Config::from_env().context("Failed to load configuration from environment variables")?
        }
    };
    info!("Artifact root: {}", config.artifact_root.display());

    let service = Arc::new(ProofService::from_config(&config));

    match args.command {
        Command::Serve { build_on_start } => serve(service, &config, build_on_start).await?,
        Command::Build { names } => build(&service, names).await?,
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&service.get_build_status().await)?);
        }
        Command::Prove { circuit, input, out } => {
            let contents = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let input: ClaimInput = serde_json::from_str(&contents)?;
            let proof = service.generate_proof(&circuit, input).await;
            emit(&proof, out)?;
        }
        Command::ProveAge { dob, min_age, salt, out } => {
            let proof = service.generate_age_proof(dob, min_age, &salt).await?;
            emit(&proof, out)?;
        }
        Command::ProveCitizenship { number, issue_date, salt, valid, out } => {
            let validity = valid.map_or(CitizenshipValidity::Stub, CitizenshipValidity::Attested);
            let proof = service
                .generate_citizenship_proof(&number, issue_date, &salt, validity)
                .await?;
            emit(&proof, out)?;
        }
        Command::Verify { proof_file } => {
            let contents = std::fs::read_to_string(&proof_file)
                .with_context(|| format!("reading {}", proof_file.display()))?;
            let envelope: ZkProof = serde_json::from_str(&contents)?;

            if service.verify_envelope(&envelope).await {
                println!("VALID");
            } else {
                println!("INVALID");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn serve(service: Arc<ProofService>, config: &Config, build_on_start: bool) -> Result<()> {
    if build_on_start {
        let handle = service.spawn_build();
        tokio::spawn(async move {
            match handle.await {
                Ok(report) if report.is_success() => info!("Startup build complete"),
                Ok(report) => warn!("Startup build finished with {} failures", report.failed.len()),
                Err(e) => error!("Startup build task panicked: {}", e),
            }
        });
    }

    let health = warp::path("health")
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let status_service = Arc::clone(&service);
    let status = warp::path("status").and_then(move || {
        let service = Arc::clone(&status_service);
        async move { Ok::<_, warp::Rejection>(warp::reply::json(&service.get_build_status().await)) }
    });

    let server = warp::serve(health.or(status)).run(([0, 0, 0, 0], config.health_port));
    info!("Health check server started on port {}", config.health_port);

    tokio::select! {
        _ = server => {
            error!("Health server stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}

async fn build(service: &ProofService, names: Vec<String>) -> Result<()> {
    if names.is_empty() {
        let report = service.build_circuits().await;
        if !report.is_success() {
            return Err(anyhow::anyhow!("{} circuit(s) failed to build", report.failed.len()));
        }
        return Ok(());
    }

    let mut failed = 0;
    for name in &names {
        match service.build_circuit(name).await {
            Ok(info) => info!("{} is {}", name, info.state()),
            Err(e) => {
                error!("{}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} circuit(s) failed to build", failed));
    }
    Ok(())
}

fn emit(proof: &ZkProof, out: Option<PathBuf>) -> Result<()> {
    if let Some(reason) = proof.degraded_reason() {
        warn!("Proof is a MOCK and will not verify: {}", reason);
    }

    let json = serde_json::to_string_pretty(proof)?;
    match out {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Proof written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
