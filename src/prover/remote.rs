//! Remote prover: submits witness and proof jobs to a proving service over HTTP
//! and polls until they finish.
//!
//! ```text
//! POST   /v1/jobs        submit, returns { job_id, accepted }
//! GET    /v1/jobs/{id}   status
//! DELETE /v1/jobs/{id}   cancel
//! ```

use crate::field::FieldElement;
use crate::prover::workspace::JobWorkspace;
use crate::prover::{ProofScheme, ProverError, ProverOutput, ProverService, ProverStep};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Witness,
    Proof,
}

impl From<ProverStep> for JobKind {
    fn from(step: ProverStep) -> Self {
        match step {
            ProverStep::Witness => JobKind::Witness,
            ProverStep::Proof => JobKind::Proof,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobSubmitRequest {
    pub sub_flag_id: u32,
    pub kind: JobKind,
    pub scheme: ProofScheme,
    /// Circuit input, for witness jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Raw witness bytes, for proof jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobSubmitResponse {
    pub job_id: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: String, // queued|running|succeeded|failed|canceled
    #[serde(default)]
    pub elapsed_secs: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub witness: Option<Vec<u8>>,
    #[serde(default)]
    pub proof: Option<serde_json::Value>,
    #[serde(default)]
    pub public_signals: Option<Vec<FieldElement>>,
}

pub struct RemoteProver {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
    scheme: ProofScheme,
    poll_interval: Duration,
    timeout: Duration,
}

impl RemoteProver {
    pub fn new(
        base_url: String,
        auth_token: Option<String>,
        scheme: ProofScheme,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            scheme,
            poll_interval,
            timeout,
        }
    }

    fn auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(tok) = &self.auth_token {
            req.bearer_auth(tok)
        } else {
            req
        }
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/v1/jobs/{}", self.base_url, job_id)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<(), ProverError> {
        let resp = self.auth_header(self.http.delete(self.job_url(job_id))).send().await?;
        if !resp.status().is_success() {
            return Err(ProverError::Remote(format!("cancel failed: {}", resp.status())));
        }
        Ok(())
    }

    async fn submit(&self, request: &JobSubmitRequest) -> Result<String, ProverError> {
        let url = format!("{}/v1/jobs", self.base_url);
        let resp = self.auth_header(self.http.post(url).json(request)).send().await?;
        if !resp.status().is_success() {
            return Err(ProverError::Remote(format!("submit failed: {}", resp.status())));
        }
        let JobSubmitResponse { job_id, accepted } = resp.json().await?;
        if !accepted {
            return Err(ProverError::Remote("job not accepted".into()));
        }
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, ProverError> {
        loop {
            let resp = self.auth_header(self.http.get(self.job_url(job_id))).send().await?;
            if !resp.status().is_success() {
                return Err(ProverError::Remote(format!("poll failed: {}", resp.status())));
            }
            let status: JobStatusResponse = resp.json().await?;
            log::debug!("remote job {} {} ({}s)", job_id, status.state, status.elapsed_secs);
            match status.state.as_str() {
                "succeeded" => return Ok(status),
                "failed" | "canceled" => {
                    return Err(ProverError::Remote(
                        status.error.unwrap_or_else(|| format!("job {}", status.state)),
                    ))
                }
                _ => {}
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Submits and waits for one job. Cancels it remotely if the timeout fires.
    async fn run(
        &self,
        step: ProverStep,
        request: JobSubmitRequest,
    ) -> Result<JobStatusResponse, ProverError> {
        let job_id = self.submit(&request).await?;
        match tokio::time::timeout(self.timeout, self.poll(&job_id)).await {
            Ok(status) => status,
            Err(_) => {
                if let Err(e) = self.cancel_job(&job_id).await {
                    log::warn!("failed to cancel remote job {job_id}: {e}");
                }
                Err(ProverError::Timeout {
                    step,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl ProverService for RemoteProver {
    async fn compute_witness(&self, workspace: &JobWorkspace) -> Result<(), ProverError> {
        let input_bytes = tokio::fs::read(workspace.input_path()).await?;
        let input: serde_json::Value = serde_json::from_slice(&input_bytes)
            .map_err(|e| ProverError::MalformedOutput(format!("input.json: {e}")))?;
        let request = JobSubmitRequest {
            sub_flag_id: workspace.sub_flag_id(),
            kind: ProverStep::Witness.into(),
            scheme: self.scheme,
            input: Some(input),
            witness: None,
        };
        let status = self.run(ProverStep::Witness, request).await?;
        let witness = status
            .witness
            .ok_or_else(|| ProverError::MalformedOutput("missing witness".into()))?;
        tokio::fs::write(workspace.witness_path(), witness).await?;
        Ok(())
    }

    async fn generate_proof(&self, workspace: &JobWorkspace) -> Result<ProverOutput, ProverError> {
        let witness = tokio::fs::read(workspace.witness_path()).await?;
        let request = JobSubmitRequest {
            sub_flag_id: workspace.sub_flag_id(),
            kind: ProverStep::Proof.into(),
            scheme: self.scheme,
            input: None,
            witness: Some(witness),
        };
        let status = self.run(ProverStep::Proof, request).await?;
        let output = ProverOutput {
            proof: status
                .proof
                .ok_or_else(|| ProverError::MalformedOutput("missing proof".into()))?,
            public_signals: status
                .public_signals
                .ok_or_else(|| ProverError::MalformedOutput("missing public signals".into()))?,
        };
        workspace.write_output(&output).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn witness_request_omits_witness_bytes() {
        let request = JobSubmitRequest {
            sub_flag_id: 2,
            kind: JobKind::Witness,
            scheme: ProofScheme::Groth16,
            input: Some(json!({ "commitment": "1" })),
            witness: None,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "sub_flag_id": 2,
                "kind": "witness",
                "scheme": "groth16",
                "input": { "commitment": "1" }
            })
        );
    }

    #[test]
    fn status_response_tolerates_missing_fields() {
        let status: JobStatusResponse =
            serde_json::from_value(json!({ "job_id": "j1", "state": "running" })).unwrap();
        assert_eq!(status.state, "running");
        assert!(status.proof.is_none());

        let done: JobStatusResponse = serde_json::from_value(json!({
            "job_id": "j1",
            "state": "succeeded",
            "proof": { "protocol": "plonk" },
            "public_signals": ["5", 6]
        }))
        .unwrap();
        assert_eq!(
            done.public_signals,
            Some(vec![FieldElement::from_u64(5), FieldElement::from_u64(6)])
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let prover = RemoteProver::new(
            "http://localhost:8088/".into(),
            None,
            ProofScheme::Plonk,
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert_eq!(prover.job_url("abc"), "http://localhost:8088/v1/jobs/abc");
    }
}
