//! Verifier gateway client
//!
//! Submits `verifyAndScore` calls through the ledger gateway:
//! `POST {url}/v1/scoreboard/submit`.

use crate::field::FieldElement;
use crate::verifier::error::SubmissionError;
use crate::verifier::{Receipt, Verifier};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    scoreboard: &'a str,
    network: &'a str,
    sub_flag_index: u32,
    nonce: u64,
    proof: &'a [FieldElement],
    public_signals: &'a [FieldElement],
}

#[derive(Debug, Clone)]
pub struct VerifierClient {
    client: Client,
    base_url: String,
    scoreboard: String,
    network: String,
}

impl VerifierClient {
    pub fn new(
        base_url: &str,
        scoreboard: String,
        network: String,
        timeout: Duration,
    ) -> Result<Self, SubmissionError> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            scoreboard,
            network,
        })
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn handle_response_status(&self, response: Response, nonce: u64) -> Result<Response, SubmissionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::CONFLICT {
            return Err(SubmissionError::NonceConflict(nonce));
        }
        let error = SubmissionError::from_response(response).await;
        Err(classify_rejection(error))
    }
}

/// A client error whose body names a revert or failed verification is a rejection.
fn classify_rejection(error: SubmissionError) -> SubmissionError {
    match error {
        SubmissionError::Http {
            status, ref message, ..
        } if (400..500).contains(&status) && status != 429 => {
            let lowered = message.to_lowercase();
            if lowered.contains("revert") || lowered.contains("verif") || lowered.contains("invalid proof") {
                let detail = error.to_pretty().unwrap_or_else(|| message.clone());
                SubmissionError::Rejected(detail)
            } else {
                error
            }
        }
        other => other,
    }
}

#[async_trait]
impl Verifier for VerifierClient {
    async fn verify_and_score(
        &self,
        sub_flag_index: u32,
        nonce: u64,
        proof: &[FieldElement],
        public_signals: &[FieldElement],
    ) -> Result<Receipt, SubmissionError> {
        let request = SubmitRequest {
            scoreboard: &self.scoreboard,
            network: &self.network,
            sub_flag_index,
            nonce,
            proof,
            public_signals,
        };
        debug!("verifyAndScore sub-flag {} nonce {}", sub_flag_index, nonce);

        let response = self
            .client
            .post(self.build_url("v1/scoreboard/submit"))
            .json(&request)
            .send()
            .await?;
        let response = self.handle_response_status(response, nonce).await?;
        let receipt: Receipt = response.json().await?;
        if !receipt.success {
            return Err(SubmissionError::Rejected(format!(
                "transaction {} reverted",
                receipt.tx_hash.as_deref().unwrap_or("<unknown>")
            )));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http(status: u16, message: &str) -> SubmissionError {
        SubmissionError::Http {
            status,
            message: message.to_string(),
            headers: vec![],
        }
    }

    #[test]
    fn request_uses_decimal_strings() {
        let proof = vec![FieldElement::from_u64(1), FieldElement::from_u64(2)];
        let public_signals = vec![FieldElement::from_u64(3)];
        let request = SubmitRequest {
            scoreboard: "0xabc",
            network: "localhost",
            sub_flag_index: 1,
            nonce: 5,
            proof: &proof,
            public_signals: &public_signals,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "scoreboard": "0xabc",
                "network": "localhost",
                "subFlagIndex": 1,
                "nonce": 5,
                "proof": ["1", "2"],
                "publicSignals": ["3"]
            })
        );
    }

    #[test]
    fn revert_bodies_become_rejections() {
        let err = classify_rejection(http(400, r#"{"name":"CallException","message":"execution reverted: invalid proof"}"#));
        assert!(matches!(err, SubmissionError::Rejected(_)));

        let err = classify_rejection(http(404, "not found"));
        assert!(matches!(err, SubmissionError::Http { status: 404, .. }));

        let err = classify_rejection(http(500, "verifier reverted"));
        assert!(matches!(err, SubmissionError::Http { status: 500, .. }));
    }

    #[test]
    fn builds_urls_without_double_slashes() {
        let client = VerifierClient::new(
            "http://127.0.0.1:8545/",
            String::new(),
            "localhost".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.build_url("/v1/scoreboard/submit"),
            "http://127.0.0.1:8545/v1/scoreboard/submit"
        );
    }

    #[test]
    fn receipt_accepts_missing_tx_hash() {
        let receipt: Receipt = serde_json::from_value(json!({ "gasUsed": 21000, "success": true })).unwrap();
        assert_eq!(receipt.gas_used, 21000);
        assert_eq!(receipt.tx_hash, None);
    }
}
