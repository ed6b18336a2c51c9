pub mod circuit {
    /// Chunks per sub-flag. Matches `component main = SubFlagCheck(3)`.
    pub const DEFAULT_NUM_CHUNKS: usize = 3;
    pub const MAX_NUM_CHUNKS: usize = 64;

    /// Hex digits per chunk: one 64-bit circuit input.
    pub const CHUNK_HEX_WIDTH: usize = 16;

    pub const CIRCUIT_NAME: &str = "SubFlagCheck";
}

pub mod commitment {
    pub const SUB_FLAG_PREFIX: &str = "CTF-";
    /// 8 random bytes keep "CTF-" + 16 hex digits within three chunks.
    pub const SUB_FLAG_RANDOM_BYTES: usize = 8;
    pub const DEFAULT_SUB_FLAG_COUNT: usize = 4;
    pub const DEFAULT_MASTER_KEY: &str = "SUPER_SECRET_MASTER_KEY";
    pub const DEFAULT_ARTIFACT_FILE: &str = "ctf_data.json";
}

pub mod prover {
    // Queue sizes. Large enough that workers never block on reporting.
    pub const EVENT_QUEUE_SIZE: usize = 100;

    pub const DEFAULT_PROOF_DIR: &str = "proofs";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:8088";

    pub const INPUT_FILE: &str = "input.json";
    pub const WITNESS_FILE: &str = "witness.wtns";
    pub const PROOF_FILE: &str = "proof.json";
    pub const PUBLIC_FILE: &str = "public.json";
    pub const JOB_DIR_PREFIX: &str = "proof_";
}

pub mod submission {
    /// Minimum gap between sequential submissions.
    pub const DEFAULT_THROTTLE_MS: u64 = 100;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
    /// Linear backoff step between retried attempts: 100, 200, 300ms...
    pub const RETRY_BACKOFF_STEP_MS: u64 = 100;
    pub const DEFAULT_START_NONCE: u64 = 1;
    pub const DEFAULT_VERIFIER_URL: &str = "http://127.0.0.1:8545";
    pub const DEFAULT_NETWORK: &str = "localhost";
}
