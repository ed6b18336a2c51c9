//! Proof Job
//!
//! One unit of proving work: a sub-flag's chunks and commitment, ready to be
//! handed to a Prover Service.

use crate::commitment::{Commitment, SubFlag};
use crate::encoder::{encode, reconstruct_hex, ChunkSet, EncodingError};
use crate::prover::CircuitInput;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofJob {
    /// Sub-flag this job proves knowledge of
    pub sub_flag_id: u32,

    /// Circuit inputs derived from the secret
    pub chunk_set: ChunkSet,

    /// Public commitment the circuit checks against
    pub commitment: Commitment,

    pub state: JobState,
}

impl ProofJob {
    pub fn new(sub_flag_id: u32, chunk_set: ChunkSet, commitment: Commitment) -> Self {
        Self {
            sub_flag_id,
            chunk_set,
            commitment,
            state: JobState::Pending,
        }
    }

    /// Encodes a sub-flag into a pending job.
    pub fn prepare(sub_flag: &SubFlag, chunk_count: usize) -> Result<Self, EncodingError> {
        let chunk_set = encode(sub_flag.secret(), chunk_count)?;
        let hex_string = hex::encode(sub_flag.secret().as_bytes());
        debug_assert_eq!(reconstruct_hex(&chunk_set, hex_string.len()), hex_string);
        Ok(Self::new(sub_flag.id(), chunk_set, *sub_flag.commitment()))
    }

    pub fn circuit_input(&self) -> CircuitInput {
        CircuitInput {
            sub_flag_chunk: self.chunk_set.clone(),
            commitment: self.commitment.to_field_element(),
        }
    }
}

impl Display for ProofJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sub-flag {}, Chunks: {}, State: {}",
            self.sub_flag_id,
            self.chunk_set.len(),
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::CommitmentStore;

    #[test]
    fn prepare_encodes_secret_and_carries_commitment() {
        let store = CommitmentStore::from_secrets(vec!["CTF-abc123".to_string()], "key");
        let sub_flag = &store.sub_flags()[0];

        let job = ProofJob::prepare(sub_flag, 3).unwrap();
        assert_eq!(job.sub_flag_id, 0);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.chunk_set, encode("CTF-abc123", 3).unwrap());
        assert_eq!(job.circuit_input().commitment, sub_flag.commitment().to_field_element());
    }

    #[test]
    fn prepare_rejects_oversized_secret() {
        let store = CommitmentStore::from_secrets(vec!["x".repeat(40)], "key");
        let err = ProofJob::prepare(&store.sub_flags()[0], 3).unwrap_err();
        assert!(matches!(err, EncodingError::Overflow { .. }));
    }
}
