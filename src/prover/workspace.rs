//! Per-job proof directory: the on-disk contract between the orchestrator and a
//! Prover Service.
//!
//! ```text
//! <proof_dir>/proof_<id>/
//!     input.json     circuit input
//!     witness.wtns   opaque witness
//!     proof.json     proof
//!     public.json    public signals
//! ```

use crate::commitment::PersistenceError;
use crate::consts::prover::{INPUT_FILE, JOB_DIR_PREFIX, PROOF_FILE, PUBLIC_FILE, WITNESS_FILE};
use crate::field::FieldElement;
use crate::prover::{CircuitInput, ProofArtifact, ProverError, ProverOutput};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    sub_flag_id: u32,
    dir: PathBuf,
}

impl JobWorkspace {
    pub fn for_job(root: &Path, sub_flag_id: u32) -> Self {
        Self {
            sub_flag_id,
            dir: root.join(format!("{JOB_DIR_PREFIX}{sub_flag_id}")),
        }
    }

    pub fn sub_flag_id(&self) -> u32 {
        self.sub_flag_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    pub fn witness_path(&self) -> PathBuf {
        self.dir.join(WITNESS_FILE)
    }

    pub fn proof_path(&self) -> PathBuf {
        self.dir.join(PROOF_FILE)
    }

    pub fn public_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_FILE)
    }

    /// Creates the directory and writes `input.json`. Outputs of an earlier run are
    /// removed first so a failed run never leaves a finished-looking directory.
    pub async fn write_input(&self, input: &CircuitInput) -> Result<(), ProverError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        for stale in [self.witness_path(), self.proof_path(), self.public_path()] {
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        let json = serde_json::to_vec(input)
            .map_err(|e| ProverError::MalformedOutput(format!("cannot encode circuit input: {e}")))?;
        tokio::fs::write(self.input_path(), json).await?;
        Ok(())
    }

    /// Reads `proof.json` and `public.json` after a successful proving step.
    pub async fn read_output(&self) -> Result<ProverOutput, ProverError> {
        let proof_bytes = tokio::fs::read(self.proof_path()).await?;
        let public_bytes = tokio::fs::read(self.public_path()).await?;
        parse_output(&proof_bytes, &public_bytes).map_err(ProverError::MalformedOutput)
    }

    /// Writes `proof.json` and `public.json`, for backends that receive them over the wire.
    pub async fn write_output(&self, output: &ProverOutput) -> Result<(), ProverError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let proof = serde_json::to_vec_pretty(&output.proof)
            .map_err(|e| ProverError::MalformedOutput(e.to_string()))?;
        let public = serde_json::to_vec_pretty(&output.public_signals)
            .map_err(|e| ProverError::MalformedOutput(e.to_string()))?;
        tokio::fs::write(self.proof_path(), proof).await?;
        tokio::fs::write(self.public_path(), public).await?;
        Ok(())
    }

    /// Reloads the artifact left behind by an earlier `prove` run.
    pub fn load_artifact(&self) -> Result<ProofArtifact, PersistenceError> {
        let proof_path = self.proof_path();
        let public_path = self.public_path();
        let proof_bytes = std::fs::read(&proof_path).map_err(|e| PersistenceError::io(&proof_path, e))?;
        let public_bytes =
            std::fs::read(&public_path).map_err(|e| PersistenceError::io(&public_path, e))?;
        let output = parse_output(&proof_bytes, &public_bytes).map_err(PersistenceError::Inconsistent)?;
        // Generation time is not persisted.
        Ok(ProofArtifact::new(self.sub_flag_id, output, Duration::ZERO))
    }
}

fn parse_output(proof: &[u8], public: &[u8]) -> Result<ProverOutput, String> {
    let proof: serde_json::Value =
        serde_json::from_slice(proof).map_err(|e| format!("{PROOF_FILE}: {e}"))?;
    if !proof.is_object() {
        return Err(format!("{PROOF_FILE} is not a JSON object"));
    }
    let public_signals: Vec<FieldElement> =
        serde_json::from_slice(public).map_err(|e| format!("{PUBLIC_FILE}: {e}"))?;
    Ok(ProverOutput {
        proof,
        public_signals,
    })
}

/// Finds every `proof_<id>` directory holding a finished proof, ordered by id.
pub fn discover(root: &Path) -> Result<Vec<JobWorkspace>, PersistenceError> {
    let entries = std::fs::read_dir(root).map_err(|e| PersistenceError::io(root, e))?;
    let mut workspaces = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io(root, e))?;
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(JOB_DIR_PREFIX))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        let workspace = JobWorkspace::for_job(root, id);
        if workspace.proof_path().is_file() && workspace.public_path().is_file() {
            workspaces.push(workspace);
        }
    }
    workspaces.sort_by_key(|w| w.sub_flag_id);
    Ok(workspaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn input_json_matches_circuit_shape() {
        let dir = tempdir().unwrap();
        let workspace = JobWorkspace::for_job(dir.path(), 3);
        let input = CircuitInput {
            sub_flag_chunk: encode("", 2).unwrap(),
            commitment: FieldElement::from_u64(43523452345),
        };
        workspace.write_input(&input).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(workspace.input_path()).unwrap()).unwrap();
        assert_eq!(
            written,
            json!({ "subFlagChunk": ["0", "0"], "commitment": "43523452345" })
        );
        assert!(workspace.dir().ends_with("proof_3"));
    }

    #[tokio::test]
    async fn output_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let workspace = JobWorkspace::for_job(dir.path(), 1);
        let output = ProverOutput {
            proof: json!({ "protocol": "plonk" }),
            public_signals: vec![FieldElement::from_u64(9)],
        };
        workspace.write_output(&output).await.unwrap();
        assert_eq!(workspace.read_output().await.unwrap(), output);

        let artifact = workspace.load_artifact().unwrap();
        assert_eq!(artifact.sub_flag_id(), 1);
        assert_eq!(artifact.public_signals(), &[FieldElement::from_u64(9)]);
    }

    #[tokio::test]
    async fn discover_skips_unfinished_and_foreign_dirs() {
        let dir = tempdir().unwrap();
        let output = ProverOutput {
            proof: json!({}),
            public_signals: vec![],
        };
        JobWorkspace::for_job(dir.path(), 10).write_output(&output).await.unwrap();
        JobWorkspace::for_job(dir.path(), 2).write_output(&output).await.unwrap();
        std::fs::create_dir_all(dir.path().join("proof_5")).unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();

        let ids: Vec<u32> = discover(dir.path()).unwrap().iter().map(|w| w.sub_flag_id()).collect();
        assert_eq!(ids, vec![2, 10]);
    }

    #[tokio::test]
    async fn rerun_clears_previous_outputs() {
        let dir = tempdir().unwrap();
        let workspace = JobWorkspace::for_job(dir.path(), 4);
        let output = ProverOutput {
            proof: json!({ "protocol": "groth16" }),
            public_signals: vec![FieldElement::from_u64(1)],
        };
        workspace.write_output(&output).await.unwrap();
        std::fs::write(workspace.witness_path(), b"old").unwrap();
        assert_eq!(discover(dir.path()).unwrap().len(), 1);

        let input = CircuitInput {
            sub_flag_chunk: encode("CTF-abc123", 3).unwrap(),
            commitment: FieldElement::from_u64(7),
        };
        workspace.write_input(&input).await.unwrap();

        assert!(workspace.input_path().is_file());
        assert!(!workspace.witness_path().exists());
        assert!(!workspace.proof_path().exists());
        assert!(!workspace.public_path().exists());
        assert!(discover(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn malformed_public_signals_are_rejected() {
        assert!(parse_output(b"{}", b"[\"zz\"]").is_err());
        assert!(parse_output(b"[]", b"[]").is_err());
    }
}
