//! Prover Service
//!
//! The orchestrator drives proving through the [`ProverService`] trait so its
//! scheduling does not depend on how a single proof is computed. Two backends:
//! * [`snarkjs::SnarkjsProver`] runs the snarkjs CLI as a child process.
//! * [`remote::RemoteProver`] hands the job to a remote proving service over HTTP.
//!
//! Both exchange data through the per-job [`workspace::JobWorkspace`] directory.

pub mod remote;
pub mod snarkjs;
pub mod workspace;

use crate::encoder::ChunkSet;
use crate::field::FieldElement;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use workspace::JobWorkspace;

/// Proving system the circuit was set up for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProofScheme {
    Groth16,
    #[default]
    Plonk,
}

impl ProofScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofScheme::Groth16 => "groth16",
            ProofScheme::Plonk => "plonk",
        }
    }
}

impl Display for ProofScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which Prover Service call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProverStep {
    Witness,
    Proof,
}

impl Display for ProverStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProverStep::Witness => write!(f, "witness generation"),
            ProverStep::Proof => write!(f, "proof generation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProverError {
    #[error("{step} exited with {}: {diagnostics}", exit_label(.code))]
    Process {
        step: ProverStep,
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("failed to launch prover for {step}: {source}")]
    Spawn {
        step: ProverStep,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} timed out after {after:?}")]
    Timeout { step: ProverStep, after: Duration },

    #[error("malformed prover output: {0}")]
    MalformedOutput(String),

    #[error("remote prover error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("cancelled before admission")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Contents of `input.json`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitInput {
    pub sub_flag_chunk: ChunkSet,
    pub commitment: FieldElement,
}

/// What a successful proof-generation call yields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProverOutput {
    pub proof: serde_json::Value,
    pub public_signals: Vec<FieldElement>,
}

/// A proof ready for submission. Produced once per succeeded job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofArtifact {
    sub_flag_id: u32,
    proof: serde_json::Value,
    public_signals: Vec<FieldElement>,
    generation_duration: Duration,
}

impl ProofArtifact {
    pub fn new(sub_flag_id: u32, output: ProverOutput, generation_duration: Duration) -> Self {
        Self {
            sub_flag_id,
            proof: output.proof,
            public_signals: output.public_signals,
            generation_duration,
        }
    }

    pub fn sub_flag_id(&self) -> u32 {
        self.sub_flag_id
    }

    pub fn proof(&self) -> &serde_json::Value {
        &self.proof
    }

    pub fn public_signals(&self) -> &[FieldElement] {
        &self.public_signals
    }

    pub fn generation_duration(&self) -> Duration {
        self.generation_duration
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProverService: Send + Sync {
    /// Computes `witness.wtns` from the workspace's `input.json`.
    async fn compute_witness(&self, workspace: &JobWorkspace) -> Result<(), ProverError>;

    /// Proves from `witness.wtns`, leaving `proof.json` and `public.json` behind.
    async fn generate_proof(&self, workspace: &JobWorkspace) -> Result<ProverOutput, ProverError>;
}
