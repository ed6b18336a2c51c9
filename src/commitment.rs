//! Commitment Store
//!
//! Organizer side: generates sub-flags and their Keccak-256 commitments and
//! writes the commitment artifact (`ctf_data.json`). Participant side: reloads the
//! published artifact and attaches recovered secrets after checking them against
//! the published commitments.

use crate::consts::commitment::{SUB_FLAG_PREFIX, SUB_FLAG_RANDOM_BYTES};
use crate::field::FieldElement;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fs, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed artifact {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("inconsistent artifact: {0}")]
    Inconsistent(String),

    #[error("sub-flag {id} does not match its published commitment")]
    CommitmentMismatch { id: u32 },

    #[error("unknown sub-flag id {id} ({count} commitments published)")]
    UnknownSubFlag { id: u32, count: usize },
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            PersistenceError::NotFound(path.to_path_buf())
        } else {
            PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn parse(path: &Path, source: serde_json::Error) -> Self {
        PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Keccak-256 digest of a secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment([u8; 32]);

impl Commitment {
    /// The digest as a circuit input (big-endian integer).
    pub fn to_field_element(&self) -> FieldElement {
        FieldElement::from_be_bytes(&self.0)
    }
}

impl Display for Commitment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Commitment({self})")
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("invalid commitment {s:?}: {e}"))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("commitment must be 32 bytes, got {}", b.len()))?;
        Ok(Commitment(digest))
    }
}

impl Serialize for Commitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The commitment function: Keccak-256 over the UTF-8 bytes of `secret`.
pub fn commit(secret: &str) -> Commitment {
    let digest = Keccak256::digest(secret.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Commitment(bytes)
}

/// A secret token and its public commitment. Immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct SubFlag {
    id: u32,
    secret: String,
    commitment: Commitment,
}

impl SubFlag {
    pub fn new(id: u32, secret: String) -> Self {
        let commitment = commit(&secret);
        Self {
            id,
            secret,
            commitment,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for SubFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubFlag")
            .field("id", &self.id)
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

/// On-disk form of the commitment set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentArtifact {
    #[serde(rename = "N")]
    pub n: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_flags: Option<Vec<String>>,

    pub commitments: Vec<Commitment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,

    pub master_key_commitment: Commitment,
}

/// A participant's recovered sub-flag, as listed in a solutions file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub id: u32,
    pub flag: String,
}

#[derive(Debug, Clone)]
pub struct CommitmentStore {
    commitments: Vec<Commitment>,
    sub_flags: Vec<SubFlag>,
    master_key: Option<String>,
    master_key_commitment: Commitment,
}

fn random_sub_flag() -> String {
    let mut bytes = [0u8; SUB_FLAG_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SUB_FLAG_PREFIX, hex::encode(bytes))
}

impl CommitmentStore {
    /// Generates `count` fresh sub-flags from the OS random source.
    pub fn generate(count: usize, master_key: &str) -> Self {
        let secrets = (0..count).map(|_| random_sub_flag()).collect();
        Self::from_secrets(secrets, master_key)
    }

    pub fn from_secrets(secrets: Vec<String>, master_key: &str) -> Self {
        let sub_flags: Vec<SubFlag> = secrets
            .into_iter()
            .enumerate()
            .map(|(id, secret)| SubFlag::new(id as u32, secret))
            .collect();
        Self {
            commitments: sub_flags.iter().map(|f| f.commitment).collect(),
            sub_flags,
            master_key: Some(master_key.to_string()),
            master_key_commitment: commit(master_key),
        }
    }

    /// Reconstitutes a store from an artifact written by [`CommitmentStore::save`].
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let buf = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        let artifact: CommitmentArtifact =
            serde_json::from_slice(&buf).map_err(|e| PersistenceError::parse(path, e))?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: CommitmentArtifact) -> Result<Self, PersistenceError> {
        if artifact.n != artifact.commitments.len() {
            return Err(PersistenceError::Inconsistent(format!(
                "N is {} but {} commitments are listed",
                artifact.n,
                artifact.commitments.len()
            )));
        }

        let mut sub_flags = Vec::new();
        if let Some(secrets) = artifact.sub_flags {
            if secrets.len() != artifact.commitments.len() {
                return Err(PersistenceError::Inconsistent(format!(
                    "{} sub-flags but {} commitments",
                    secrets.len(),
                    artifact.commitments.len()
                )));
            }
            for (id, (secret, published)) in secrets.into_iter().zip(&artifact.commitments).enumerate() {
                let sub_flag = SubFlag::new(id as u32, secret);
                if sub_flag.commitment != *published {
                    return Err(PersistenceError::CommitmentMismatch { id: id as u32 });
                }
                sub_flags.push(sub_flag);
            }
        }

        if let Some(master_key) = &artifact.master_key {
            if commit(master_key) != artifact.master_key_commitment {
                return Err(PersistenceError::Inconsistent(
                    "master key does not match masterKeyCommitment".to_string(),
                ));
            }
        }

        Ok(Self {
            commitments: artifact.commitments,
            sub_flags,
            master_key: artifact.master_key,
            master_key_commitment: artifact.master_key_commitment,
        })
    }

    pub fn to_artifact(&self, include_secrets: bool) -> CommitmentArtifact {
        let secrets_known = self.sub_flags.len() == self.commitments.len();
        CommitmentArtifact {
            n: self.commitments.len(),
            sub_flags: (include_secrets && secrets_known)
                .then(|| self.sub_flags.iter().map(|f| f.secret.clone()).collect()),
            commitments: self.commitments.clone(),
            master_key: if include_secrets { self.master_key.clone() } else { None },
            master_key_commitment: self.master_key_commitment,
        }
    }

    /// Writes the artifact as pretty JSON, creating parent directories.
    /// With `include_secrets == false` the output is safe to publish.
    pub fn save(&self, path: &Path, include_secrets: bool) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.to_artifact(include_secrets))
            .map_err(|e| PersistenceError::parse(path, e))?;
        fs::write(path, json).map_err(|e| PersistenceError::io(path, e))
    }

    fn check_solution(&self, id: u32, secret: &str) -> Result<(), PersistenceError> {
        let published = self
            .commitments
            .get(id as usize)
            .ok_or(PersistenceError::UnknownSubFlag {
                id,
                count: self.commitments.len(),
            })?;
        if commit(secret) != *published {
            return Err(PersistenceError::CommitmentMismatch { id });
        }
        Ok(())
    }

    /// Attaches a recovered secret to a published commitment.
    pub fn solve(&mut self, id: u32, secret: &str) -> Result<&SubFlag, PersistenceError> {
        self.check_solution(id, secret)?;

        // Kept sorted by id.
        let position = match self.sub_flags.binary_search_by_key(&id, |f| f.id) {
            Ok(position) => position,
            Err(position) => {
                self.sub_flags.insert(position, SubFlag::new(id, secret.to_string()));
                position
            }
        };
        Ok(&self.sub_flags[position])
    }

    /// Reads a solutions file and attaches every listed secret. Nothing is attached
    /// unless every entry matches its commitment.
    pub fn load_solutions(&mut self, path: &Path) -> Result<usize, PersistenceError> {
        let buf = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        let solutions: Vec<Solution> =
            serde_json::from_slice(&buf).map_err(|e| PersistenceError::parse(path, e))?;
        for solution in &solutions {
            self.check_solution(solution.id, &solution.flag)?;
        }
        for solution in &solutions {
            self.solve(solution.id, &solution.flag)?;
        }
        Ok(solutions.len())
    }

    /// Sub-flags whose secrets are known to this store.
    pub fn sub_flags(&self) -> &[SubFlag] {
        &self.sub_flags
    }

    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    pub fn master_key_commitment(&self) -> &Commitment {
        &self.master_key_commitment
    }

    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn commit_is_deterministic() {
        assert_eq!(commit("CTF-abc123"), commit("CTF-abc123"));
    }

    #[test]
    fn distinct_secrets_have_distinct_commitments() {
        assert_ne!(commit("CTF-abc123"), commit("CTF-abc124"));
        assert_ne!(commit(""), commit(" "));
    }

    #[test]
    fn empty_secret_commitment_is_well_formed() {
        let digest = commit("");
        // Keccak-256 of the empty string.
        assert_eq!(
            digest.to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(digest.to_string().len(), 66);
    }

    #[test]
    fn commitment_parses_back() {
        let digest = commit("CTF-abc123");
        let parsed: Commitment = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
        assert!("0x1234".parse::<Commitment>().is_err());
    }

    #[test]
    fn generate_produces_unique_prefixed_flags() {
        let store = CommitmentStore::generate(16, "master");
        assert_eq!(store.len(), 16);
        for (id, flag) in store.sub_flags().iter().enumerate() {
            assert_eq!(flag.id(), id as u32);
            assert!(flag.secret().starts_with(SUB_FLAG_PREFIX));
            assert_eq!(flag.secret().len(), SUB_FLAG_PREFIX.len() + 2 * SUB_FLAG_RANDOM_BYTES);
            assert_eq!(*flag.commitment(), commit(flag.secret()));
        }
        let mut secrets: Vec<_> = store.sub_flags().iter().map(|f| f.secret()).collect();
        secrets.sort_unstable();
        secrets.dedup();
        assert_eq!(secrets.len(), 16);
        assert_eq!(*store.master_key_commitment(), commit("master"));
    }

    #[test]
    fn load_recovers_saved_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctf_data.json");
        let store = CommitmentStore::from_secrets(vec!["CTF-a".into(), "CTF-b".into()], "mk");
        store.save(&path, true).unwrap();

        let loaded = CommitmentStore::load(&path).unwrap();
        assert_eq!(loaded.sub_flags(), store.sub_flags());
        assert_eq!(loaded.commitments(), store.commitments());
    }

    #[test]
    fn public_artifact_has_no_secrets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("public").join("ctf_data.json");
        let store = CommitmentStore::from_secrets(vec!["CTF-a".into()], "mk");
        store.save(&path, false).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("CTF-a"));
        assert!(!text.contains("\"masterKey\""));
        assert!(text.contains("\"masterKeyCommitment\""));

        let loaded = CommitmentStore::load(&path).unwrap();
        assert!(loaded.sub_flags().is_empty());
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result = CommitmentStore::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn load_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctf_data.json");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(
            CommitmentStore::load(&path),
            Err(PersistenceError::Parse { .. })
        ));
    }

    #[test]
    fn load_rejects_tampered_secret() {
        let mut artifact =
            CommitmentStore::from_secrets(vec!["CTF-a".into(), "CTF-b".into()], "mk").to_artifact(true);
        artifact.sub_flags = Some(vec!["CTF-a".into(), "CTF-x".into()]);
        assert!(matches!(
            CommitmentStore::from_artifact(artifact),
            Err(PersistenceError::CommitmentMismatch { id: 1 })
        ));
    }

    #[test]
    fn load_rejects_wrong_count() {
        let mut artifact = CommitmentStore::from_secrets(vec!["CTF-a".into()], "mk").to_artifact(false);
        artifact.n = 2;
        assert!(matches!(
            CommitmentStore::from_artifact(artifact),
            Err(PersistenceError::Inconsistent(_))
        ));
    }

    #[test]
    fn solutions_are_checked_against_commitments() {
        let dir = tempdir().unwrap();
        let organizer = CommitmentStore::from_secrets(vec!["CTF-a".into(), "CTF-b".into()], "mk");
        let public_path = dir.path().join("ctf_data.json");
        organizer.save(&public_path, false).unwrap();

        let mut participant = CommitmentStore::load(&public_path).unwrap();
        let solutions_path = dir.path().join("solutions.json");
        fs::write(&solutions_path, r#"[{ "id": 1, "flag": "CTF-b" }]"#).unwrap();
        assert_eq!(participant.load_solutions(&solutions_path).unwrap(), 1);
        assert_eq!(participant.sub_flags().len(), 1);
        assert_eq!(participant.sub_flags()[0].id(), 1);

        assert!(matches!(
            participant.solve(0, "CTF-wrong"),
            Err(PersistenceError::CommitmentMismatch { id: 0 })
        ));
        assert!(matches!(
            participant.solve(9, "CTF-a"),
            Err(PersistenceError::UnknownSubFlag { id: 9, count: 2 })
        ));
    }

    #[test]
    fn failed_solution_attaches_nothing() {
        let dir = tempdir().unwrap();
        let organizer = CommitmentStore::from_secrets(vec!["CTF-a".into(), "CTF-b".into()], "mk");
        let public_path = dir.path().join("ctf_data.json");
        organizer.save(&public_path, false).unwrap();

        let mut participant = CommitmentStore::load(&public_path).unwrap();
        let solutions_path = dir.path().join("solutions.json");
        fs::write(
            &solutions_path,
            r#"[{ "id": 0, "flag": "CTF-a" }, { "id": 1, "flag": "CTF-wrong" }]"#,
        )
        .unwrap();

        assert!(matches!(
            participant.load_solutions(&solutions_path),
            Err(PersistenceError::CommitmentMismatch { id: 1 })
        ));
        assert!(participant.sub_flags().is_empty());
    }
}
