//! Out-of-process prover: shells out to the snarkjs CLI.

use crate::prover::workspace::JobWorkspace;
use crate::prover::{ProofScheme, ProverError, ProverOutput, ProverService, ProverStep};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SnarkjsProver {
    binary: PathBuf,
    circuit_wasm: PathBuf,
    proving_key: PathBuf,
    scheme: ProofScheme,
    timeout: Duration,
}

impl SnarkjsProver {
    pub fn new(
        binary: PathBuf,
        circuit_wasm: PathBuf,
        proving_key: PathBuf,
        scheme: ProofScheme,
        timeout: Duration,
    ) -> Self {
        Self {
            binary,
            circuit_wasm,
            proving_key,
            scheme,
            timeout,
        }
    }

    fn witness_args(&self, workspace: &JobWorkspace) -> Vec<OsString> {
        vec![
            "wtns".into(),
            "calculate".into(),
            self.circuit_wasm.clone().into(),
            workspace.input_path().into(),
            workspace.witness_path().into(),
        ]
    }

    fn proof_args(&self, workspace: &JobWorkspace) -> Vec<OsString> {
        vec![
            self.scheme.as_str().into(),
            "prove".into(),
            self.proving_key.clone().into(),
            workspace.witness_path().into(),
            workspace.proof_path().into(),
            workspace.public_path().into(),
        ]
    }

    /// Runs one snarkjs invocation. The child is killed if the timeout fires.
    async fn run(&self, step: ProverStep, args: Vec<OsString>) -> Result<(), ProverError> {
        log::debug!("{} {:?}", self.binary.display(), args);
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProverError::Spawn { step, source })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ProverError::Timeout {
                    step,
                    after: self.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !diagnostics.is_empty() {
                diagnostics.push('\n');
            }
            diagnostics.push_str(stdout.trim());
        }
        Err(ProverError::Process {
            step,
            code: output.status.code(),
            diagnostics,
        })
    }
}

#[async_trait]
impl ProverService for SnarkjsProver {
    async fn compute_witness(&self, workspace: &JobWorkspace) -> Result<(), ProverError> {
        self.run(ProverStep::Witness, self.witness_args(workspace)).await
    }

    async fn generate_proof(&self, workspace: &JobWorkspace) -> Result<ProverOutput, ProverError> {
        self.run(ProverStep::Proof, self.proof_args(workspace)).await?;
        workspace.read_output().await
    }
}
