//! Application configuration.
//!
//! Resolution order: the JSON file (explicit `--config`, else
//! `./subflag.config.json`, else `~/.subflag/config.json`, else defaults), then
//! environment overrides, then command-line flags, then [`Config::validate`].

use crate::consts::circuit::{CIRCUIT_NAME, DEFAULT_NUM_CHUNKS, MAX_NUM_CHUNKS};
use crate::consts::commitment::{DEFAULT_ARTIFACT_FILE, DEFAULT_MASTER_KEY, DEFAULT_SUB_FLAG_COUNT};
use crate::consts::prover::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROOF_DIR, DEFAULT_REMOTE_URL, DEFAULT_TIMEOUT_SECS,
};
use crate::consts::submission::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_NETWORK, DEFAULT_THROTTLE_MS, DEFAULT_VERIFIER_URL,
    RETRY_BACKOFF_STEP_MS,
};
use crate::prover::ProofScheme;
use crate::submission::{RetryPolicy, SubmissionOptions};
use crate::system::num_cores;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, path::Path};
use thiserror::Error;

const LOCAL_CONFIG_FILE: &str = "subflag.config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Home directory not found")]
    NoHome,
}

/// Get the path to the config file: `./subflag.config.json` when present, else `~/.subflag/config.json`.
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    let local_config_path = PathBuf::from(LOCAL_CONFIG_FILE);
    if local_config_path.exists() {
        return Ok(local_config_path);
    }

    let home_path = home::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home_path.join(".subflag").join("config.json"))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProverBackend {
    /// snarkjs CLI child processes
    #[default]
    Snarkjs,
    /// HTTP proving service
    Remote,
}

impl FromStr for ProverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProverConfig {
    #[serde(default)]
    pub backend: ProverBackend,

    #[serde(default)]
    pub scheme: ProofScheme,

    #[serde(default = "default_snarkjs_bin")]
    pub snarkjs_bin: PathBuf,

    /// Compiled witness generator
    #[serde(default = "default_circuit_wasm")]
    pub circuit_wasm: PathBuf,

    /// Proving key from the trusted setup
    #[serde(default = "default_proving_key")]
    pub proving_key: PathBuf,

    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    #[serde(default)]
    pub remote_auth_token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for each prover call
    #[serde(default = "default_prover_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_snarkjs_bin() -> PathBuf {
    PathBuf::from("snarkjs")
}

fn default_circuit_wasm() -> PathBuf {
    PathBuf::from(format!("circuits/{CIRCUIT_NAME}.wasm"))
}

fn default_proving_key() -> PathBuf {
    PathBuf::from(format!("circuits/{CIRCUIT_NAME}.zkey"))
}

fn default_remote_url() -> String {
    DEFAULT_REMOTE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_prover_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            backend: ProverBackend::default(),
            scheme: ProofScheme::default(),
            snarkjs_bin: default_snarkjs_bin(),
            circuit_wasm: default_circuit_wasm(),
            proving_key: default_proving_key(),
            remote_url: default_remote_url(),
            remote_auth_token: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_prover_timeout_secs(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Hashed into the artifact's master key commitment
    #[serde(default = "default_master_key")]
    pub master_key: String,

    /// Sub-flags generated by `commit`
    #[serde(default = "default_sub_flag_count")]
    pub sub_flag_count: usize,

    /// Commitment artifact (organizer copy with secrets)
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,

    #[serde(default = "default_proof_dir")]
    pub proof_dir: PathBuf,

    /// Chunks per sub-flag. Must match the compiled circuit.
    #[serde(default = "default_num_chunks")]
    pub num_chunks: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Submit back-to-back instead of throttled
    #[serde(default)]
    pub parallel: bool,

    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    #[serde(default = "default_verifier_url")]
    pub verifier_url: String,

    #[serde(default)]
    pub scoreboard_address: String,

    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub prover: ProverConfig,
}

fn default_master_key() -> String {
    DEFAULT_MASTER_KEY.to_string()
}

fn default_sub_flag_count() -> usize {
    DEFAULT_SUB_FLAG_COUNT
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_FILE)
}

fn default_proof_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PROOF_DIR)
}

fn default_num_chunks() -> usize {
    DEFAULT_NUM_CHUNKS
}

fn default_max_concurrency() -> usize {
    num_cores()
}

fn default_throttle_ms() -> u64 {
    DEFAULT_THROTTLE_MS
}

fn default_verifier_url() -> String {
    DEFAULT_VERIFIER_URL.to_string()
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

fn default_submit_timeout_secs() -> u64 {
    crate::consts::submission::DEFAULT_TIMEOUT_SECS
}

fn default_max_submit_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for Config {
    fn default() -> Self {
        Config {
            master_key: default_master_key(),
            sub_flag_count: default_sub_flag_count(),
            artifact_path: default_artifact_path(),
            proof_dir: default_proof_dir(),
            num_chunks: default_num_chunks(),
            max_concurrency: default_max_concurrency(),
            parallel: false,
            throttle_ms: default_throttle_ms(),
            verifier_url: default_verifier_url(),
            scoreboard_address: String::new(),
            network: default_network(),
            submit_timeout_secs: default_submit_timeout_secs(),
            max_submit_attempts: default_max_submit_attempts(),
            debug: false,
            prover: ProverConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn truthy(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

impl Config {
    /// Loads configuration from a JSON file at the given path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let buf = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&buf).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the explicit file if given. Otherwise the default location, falling
    /// back to defaults when no file exists there.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        let path = get_config_path()?;
        if path.exists() {
            log::debug!("Loading config from {}", path.display());
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the configuration as pretty JSON, creating parent directories and
    /// replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io)?;
        Ok(())
    }

    /// Applies environment overrides through `lookup`, normally `std::env::var(..).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MASTER_KEY") {
            self.master_key = v;
        }
        if let Some(v) = lookup("N") {
            self.sub_flag_count = parse_env("N", v)?;
        }
        if let Some(v) = lookup("CTF_DATA") {
            self.artifact_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROOF_OUTPUT_DIR") {
            self.proof_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NUM_CHUNKS") {
            self.num_chunks = parse_env("NUM_CHUNKS", v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("MAX_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("SUBMISSION_MODE") {
            self.parallel = match v.trim().to_lowercase().as_str() {
                "parallel" => true,
                "sequential" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: "SUBMISSION_MODE",
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("THROTTLE_MS") {
            self.throttle_ms = parse_env("THROTTLE_MS", v)?;
        }
        if let Some(v) = lookup("VERIFIER_URL") {
            self.verifier_url = v;
        }
        if let Some(v) = lookup("SCOREBOARD_ADDRESS") {
            self.scoreboard_address = v;
        }
        if let Some(v) = lookup("NETWORK") {
            self.network = v;
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = truthy(&v);
        }
        if let Some(v) = lookup("PROVER_BACKEND") {
            self.prover.backend = parse_env("PROVER_BACKEND", v)?;
        }
        if let Some(v) = lookup("PROOF_SCHEME") {
            self.prover.scheme = ProofScheme::from_str(v.trim(), true)
                .map_err(|_| ConfigError::Env {
                    var: "PROOF_SCHEME",
                    value: v,
                })?;
        }
        if let Some(v) = lookup("REMOTE_URL") {
            self.prover.remote_url = v;
        }
        if let Some(v) = lookup("REMOTE_AUTH_TOKEN") {
            self.prover.remote_auth_token = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if !(1..=MAX_NUM_CHUNKS).contains(&self.num_chunks) {
            return invalid("num_chunks", &format!("must be between 1 and {MAX_NUM_CHUNKS}"));
        }
        if self.max_concurrency == 0 {
            return invalid("max_concurrency", "must be at least 1");
        }
        if self.max_submit_attempts == 0 {
            return invalid("max_submit_attempts", "must be at least 1");
        }
        if self.submit_timeout_secs == 0 {
            return invalid("submit_timeout_secs", "must be positive");
        }
        if self.prover.timeout_secs == 0 {
            return invalid("prover.timeout_secs", "must be positive");
        }
        if self.verifier_url.trim().is_empty() {
            return invalid("verifier_url", "must not be empty");
        }
        if self.prover.backend == ProverBackend::Remote && self.prover.remote_url.trim().is_empty() {
            return invalid("prover.remote_url", "required for the remote backend");
        }
        Ok(())
    }

    pub fn submission_options(&self) -> SubmissionOptions {
        SubmissionOptions {
            throttle: Duration::from_millis(self.throttle_ms),
            timeout: Duration::from_secs(self.submit_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_submit_attempts,
                backoff_step: Duration::from_millis(RETRY_BACKOFF_STEP_MS),
            },
        }
    }

    /// The artifact path with its secrets stripped, next to the organizer copy.
    pub fn public_artifact_path(&self) -> PathBuf {
        let stem = self
            .artifact_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("ctf_data");
        self.artifact_path.with_file_name(format!("{stem}.public.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    // Loading a saved configuration file should return the same configuration.
    fn test_load_recovers_saved_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.network = "sepolia".to_string();
        config.prover.backend = ProverBackend::Remote;
        config.save(&path).unwrap();

        let loaded_config = Config::load_from_file(&path).unwrap();
        assert_eq!(config, loaded_config);
    }

    #[test]
    // Saving a configuration should create directories if they don't exist.
    fn test_save_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent_dir").join("config.json");
        let result = Config::default().save(&path);

        assert!(result.is_ok(), "Failed to save config");
        assert!(path.parent().unwrap().exists(), "Parent directory does not exist");
    }

    #[test]
    // Loading an invalid JSON file should return an error.
    fn test_load_rejects_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid_config.json");

        let mut file = File::create(&path).unwrap();
        writeln!(file, "invalid json").unwrap();

        assert!(matches!(
            Config::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    // Missing fields fall back to their defaults and unknown fields are ignored.
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{ "num_chunks": 4, "prover": {{ "scheme": "groth16" }}, "extra_field": "value" }}"#
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.num_chunks, 4);
        assert_eq!(config.prover.scheme, ProofScheme::Groth16);
        assert_eq!(config.prover.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.throttle_ms, DEFAULT_THROTTLE_MS);
        assert_eq!(config.master_key, DEFAULT_MASTER_KEY);
        assert!(config.max_concurrency >= 1);
    }

    #[test]
    fn test_resolve_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Config::resolve(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("N", "12"),
                ("NUM_CHUNKS", "4"),
                ("SUBMISSION_MODE", "parallel"),
                ("THROTTLE_MS", "250"),
                ("DEBUG", "1"),
                ("PROVER_BACKEND", "remote"),
                ("PROOF_SCHEME", "GROTH16"),
                ("REMOTE_AUTH_TOKEN", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.sub_flag_count, 12);
        assert_eq!(config.num_chunks, 4);
        assert!(config.parallel);
        assert_eq!(config.throttle_ms, 250);
        assert!(config.debug);
        assert_eq!(config.prover.backend, ProverBackend::Remote);
        assert_eq!(config.prover.scheme, ProofScheme::Groth16);
        assert_eq!(config.prover.remote_auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[("MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "MAX_CONCURRENCY", .. }));

        let err = config
            .apply_env_overrides(env(&[("SUBMISSION_MODE", "burst")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "SUBMISSION_MODE", .. }));
    }

    #[test]
    fn test_debug_flag_values() {
        assert!(truthy("true"));
        assert!(truthy("yes"));
        assert!(!truthy("0"));
        assert!(!truthy(""));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.num_chunks = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "num_chunks", .. })
        ));
        config.num_chunks = MAX_NUM_CHUNKS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_submit_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_artifact_path() {
        let mut config = Config::default();
        config.artifact_path = PathBuf::from("out/ctf_data.json");
        assert_eq!(config.public_artifact_path(), PathBuf::from("out/ctf_data.public.json"));
    }

    #[test]
    fn test_submission_options() {
        let mut config = Config::default();
        config.max_submit_attempts = 3;
        let options = config.submission_options();
        assert_eq!(options.throttle, Duration::from_millis(DEFAULT_THROTTLE_MS));
        assert_eq!(options.retry.max_attempts, 3);
    }
}
