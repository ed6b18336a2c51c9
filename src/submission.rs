//! Submission Client
//!
//! Sends proof artifacts to the Verifier Service one attempt at a time and keeps
//! an append-only log with one [`SubmissionRecord`] per attempt. The client owns
//! nonce allocation, the sequential throttle, per-attempt deadlines and the
//! optional retry policy.

use crate::consts::submission::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_THROTTLE_MS, DEFAULT_TIMEOUT_SECS, RETRY_BACKOFF_STEP_MS,
};
use crate::events::{Event, EventType};
use crate::prover::ProofArtifact;
use crate::verifier::calldata::encode_proof;
use crate::verifier::error::SubmissionError;
use crate::verifier::{Receipt, Verifier};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Success,
    Failed,
}

/// Outcome of one verifier attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub nonce: u64,
    pub sub_flag_id: u32,
    /// 1 for the first attempt at a sub-flag, 2 for its first retry...
    pub attempt: u32,
    pub gas_used: Option<u64>,
    pub duration_ms: f64,
    /// Offset of the attempt start from the client's creation.
    pub started_at_ms: f64,
    pub status: SubmissionStatus,
    pub error: Option<String>,
    pub tx_hash: Option<String>,
    pub timestamp: String,
}

impl SubmissionRecord {
    pub fn is_success(&self) -> bool {
        self.status == SubmissionStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per sub-flag, including the first.
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: Duration::from_millis(RETRY_BACKOFF_STEP_MS),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff, unless the verifier asked for a specific delay.
    fn backoff(&self, attempt: u32, error: &SubmissionError) -> Duration {
        match error.retry_after_seconds() {
            Some(secs) => Duration::from_secs(secs as u64),
            None => self.backoff_step * attempt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionOptions {
    /// Minimum gap between the end of one sequential attempt and the start of the next.
    pub throttle: Duration,
    /// Deadline for a single verifier call.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Hands out monotonically increasing nonces and remembers every nonce used.
/// A nonce only counts as used once it is claimed.
#[derive(Debug, Clone, Default)]
pub struct NonceAllocator {
    next: u64,
    used: BTreeSet<u64>,
}

impl NonceAllocator {
    pub fn new(start: u64) -> Self {
        Self {
            next: start,
            used: BTreeSet::new(),
        }
    }

    /// Moves the cursor forward to `start`. Never moves it back.
    pub fn advance_to(&mut self, start: u64) {
        self.next = self.next.max(start);
    }

    /// Next unused nonce at or after the cursor. The cursor moves past it, but the
    /// nonce is not marked used until [`claim`](Self::claim).
    pub fn allocate(&mut self) -> u64 {
        while self.is_used(self.next) {
            self.next += 1;
        }
        let nonce = self.next;
        self.next += 1;
        nonce
    }

    /// Marks an explicitly chosen nonce as used. Returns false if it already was.
    pub fn claim(&mut self, nonce: u64) -> bool {
        self.used.insert(nonce)
    }

    pub fn is_used(&self, nonce: u64) -> bool {
        self.used.contains(&nonce)
    }
}

pub struct SubmissionClient {
    verifier: Arc<dyn Verifier>,
    options: SubmissionOptions,
    nonces: NonceAllocator,
    records: Vec<SubmissionRecord>,
    epoch: Instant,
    last_completed: Option<Instant>,
    events: Option<mpsc::Sender<Event>>,
}

impl SubmissionClient {
    pub fn new(verifier: Arc<dyn Verifier>, options: SubmissionOptions) -> Self {
        Self {
            verifier,
            options,
            nonces: NonceAllocator::default(),
            records: Vec::new(),
            epoch: Instant::now(),
            last_completed: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Every attempt made by this client, in attempt order.
    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SubmissionRecord> {
        self.records
    }

    /// One verifier call with an explicit nonce. Never retried.
    pub async fn submit(&mut self, artifact: ProofArtifact, nonce: u64, sequential: bool) -> SubmissionRecord {
        let (record, _) = self.attempt(&artifact, nonce, 1, sequential).await;
        record
    }

    /// Submits every artifact with nonces counting up from `start_nonce`. Sequential
    /// unless `parallel`, in which case attempts are issued back-to-back. Returns the
    /// records of this batch.
    pub async fn submit_batch(
        &mut self,
        artifacts: Vec<ProofArtifact>,
        start_nonce: u64,
        parallel: bool,
    ) -> Vec<SubmissionRecord> {
        let first = self.records.len();
        self.nonces.advance_to(start_nonce);
        info!(
            "Submitting {} proofs ({})",
            artifacts.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        for artifact in artifacts {
            let max_attempts = self.options.retry.max_attempts.max(1);
            for attempt in 1..=max_attempts {
                let nonce = self.nonces.allocate();
                let (_, error) = self.attempt(&artifact, nonce, attempt, !parallel).await;
                let Some(error) = error else {
                    break;
                };
                if attempt == max_attempts || !error.is_transient() {
                    break;
                }
                let backoff = self.options.retry.backoff(attempt, &error);
                warn!(
                    "Sub-flag {} attempt {} failed ({}), retrying in {:?}",
                    artifact.sub_flag_id(),
                    attempt,
                    error,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        self.records[first..].to_vec()
    }

    async fn attempt(
        &mut self,
        artifact: &ProofArtifact,
        nonce: u64,
        attempt: u32,
        sequential: bool,
    ) -> (SubmissionRecord, Option<SubmissionError>) {
        if sequential {
            self.throttle().await;
        }

        let started = Instant::now();
        let result = self.call_verifier(artifact, nonce).await;
        let completed = Instant::now();
        self.last_completed = Some(completed);

        let mut record = SubmissionRecord {
            nonce,
            sub_flag_id: artifact.sub_flag_id(),
            attempt,
            gas_used: None,
            duration_ms: (completed - started).as_secs_f64() * 1000.0,
            started_at_ms: (started - self.epoch).as_secs_f64() * 1000.0,
            status: SubmissionStatus::Failed,
            error: None,
            tx_hash: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let error = match result {
            Ok(receipt) => {
                debug!(
                    "Sub-flag {} verified with nonce {}, gas {}",
                    record.sub_flag_id, nonce, receipt.gas_used
                );
                record.status = SubmissionStatus::Success;
                record.gas_used = Some(receipt.gas_used);
                record.tx_hash = receipt.tx_hash;
                self.emit(Event::submitter(
                    format!("Sub-flag {} accepted (gas {})", record.sub_flag_id, receipt.gas_used),
                    EventType::Submitted,
                ))
                .await;
                None
            }
            Err(e) => {
                let message = e.to_pretty().unwrap_or_else(|| e.to_string());
                warn!("Sub-flag {} submission failed: {}", record.sub_flag_id, message);
                record.error = Some(message);
                self.emit(Event::submitter(
                    format!("Sub-flag {} failed: {}", record.sub_flag_id, e),
                    EventType::SubmissionFailed,
                ))
                .await;
                Some(e)
            }
        };

        self.records.push(record.clone());
        (record, error)
    }

    async fn call_verifier(&mut self, artifact: &ProofArtifact, nonce: u64) -> Result<Receipt, SubmissionError> {
        // Every verifier call claims its nonce, whether allocated or chosen by the caller.
        if !self.nonces.claim(nonce) {
            return Err(SubmissionError::NonceConflict(nonce));
        }
        let calldata = encode_proof(artifact.proof())?;
        let call = self.verifier.verify_and_score(
            artifact.sub_flag_id(),
            nonce,
            &calldata,
            artifact.public_signals(),
        );
        match tokio::time::timeout(self.options.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SubmissionError::Timeout(self.options.timeout)),
        }
    }

    async fn throttle(&self) {
        if let Some(last) = self.last_completed {
            tokio::time::sleep_until(last + self.options.throttle).await;
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event).await;
        }
    }
}
