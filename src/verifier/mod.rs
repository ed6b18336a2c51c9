//! Verifier Service
//!
//! The ledger-side component that checks a proof for a sub-flag and records the
//! score. [`client::VerifierClient`] talks to it through an HTTP gateway.

pub mod calldata;
pub mod client;
pub mod error;

use crate::field::FieldElement;
use async_trait::async_trait;
use error::SubmissionError;
use serde::{Deserialize, Serialize};

/// Confirmation of a verifier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub gas_used: u64,
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify_and_score(
        &self,
        sub_flag_index: u32,
        nonce: u64,
        proof: &[FieldElement],
        public_signals: &[FieldElement],
    ) -> Result<Receipt, SubmissionError>;
}
