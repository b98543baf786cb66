//! Discovers and pre-validates credential blobs from env vars or files.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("no valid credential indices discovered")]
    NoneAvailable,
}

#[derive(Debug, thiserror::Error)]
pub enum GetCredentialError {
    #[error("credential index {0} not found")]
    NotFound(u32),
}

#[derive(Debug, Clone)]
struct CredentialEntry {
    blob: Value,
    account_name: Option<String>,
}

/// Enumerates and pre-validates credential blobs at construction time.
/// `initial_indices ⊇ available_indices`; both sorted ascending.
#[derive(Debug)]
pub struct CredentialStore {
    initial_indices: Vec<u32>,
    available_indices: Vec<u32>,
    entries: HashMap<u32, CredentialEntry>,
}

impl CredentialStore {
    /// Env mode if any `AUTH_JSON_<N>` variable exists, else file mode
    /// listing `auth/auth-<N>.json`.
    pub fn discover() -> Result<Self, CredentialStoreError> {
        let env_candidates = discover_env_candidates();
        if !env_candidates.is_empty() {
            return Self::from_candidates(env_candidates);
        }
        Self::from_candidates(discover_file_candidates(Path::new("auth")))
    }

    pub fn discover_in(auth_dir: &Path) -> Result<Self, CredentialStoreError> {
        let env_candidates = discover_env_candidates();
        if !env_candidates.is_empty() {
            return Self::from_candidates(env_candidates);
        }
        Self::from_candidates(discover_file_candidates(auth_dir))
    }

    #[cfg(test)]
    pub(crate) fn from_candidates_for_test(candidates: Vec<(u32, String)>) -> Self {
        Self::from_candidates(candidates).expect("test candidates must include a valid entry")
    }

    fn from_candidates(
        candidates: Vec<(u32, String)>,
    ) -> Result<Self, CredentialStoreError> {
        let mut initial_indices: Vec<u32> = candidates.iter().map(|(index, _)| *index).collect();
        initial_indices.sort_unstable();

        let mut available_indices = Vec::new();
        let mut entries = HashMap::new();

        for (index, raw) in candidates {
            match serde_json::from_str::<Value>(&raw) {
                Ok(blob) => {
                    let account_name = blob
                        .get("accountName")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    entries.insert(index, CredentialEntry { blob, account_name });
                    available_indices.push(index);
                }
                Err(err) => {
                    warn!(index, error = %err, "invalid credential blob, excluded from rotation");
                }
            }
        }
        available_indices.sort_unstable();

        if available_indices.is_empty() {
            return Err(CredentialStoreError::NoneAvailable);
        }

        Ok(Self {
            initial_indices,
            available_indices,
            entries,
        })
    }

    pub fn initial_indices(&self) -> &[u32] {
        &self.initial_indices
    }

    pub fn available_indices(&self) -> &[u32] {
        &self.available_indices
    }

    pub fn get(&self, index: u32) -> Result<&Value, GetCredentialError> {
        self.entries
            .get(&index)
            .map(|entry| &entry.blob)
            .ok_or(GetCredentialError::NotFound(index))
    }

    pub fn display_name(&self, index: u32) -> Option<&str> {
        self.entries
            .get(&index)
            .and_then(|entry| entry.account_name.as_deref())
    }
}

fn discover_env_candidates() -> Vec<(u32, String)> {
    let mut candidates = Vec::new();
    for (key, value) in env::vars() {
        if let Some(suffix) = key.strip_prefix("AUTH_JSON_")
            && let Ok(index) = suffix.parse::<u32>()
        {
            candidates.push((index, value));
        }
    }
    candidates
}

fn discover_file_candidates(auth_dir: &Path) -> Vec<(u32, String)> {
    let Ok(read_dir) = fs::read_dir(auth_dir) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for entry in read_dir.flatten() {
        let path: PathBuf = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(suffix) = stem.strip_prefix("auth-") else {
            continue;
        };
        let Ok(index) = suffix.parse::<u32>() else {
            continue;
        };
        if let Ok(contents) = fs::read_to_string(&path) {
            candidates.push((index, contents));
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_blob_excluded_but_startup_continues() {
        let store = CredentialStore::from_candidates(vec![
            (1, r#"{"accountName":"a"}"#.to_string()),
            (2, "not json".to_string()),
        ])
        .unwrap();

        assert_eq!(store.initial_indices(), &[1, 2]);
        assert_eq!(store.available_indices(), &[1]);
        assert_eq!(store.display_name(1), Some("a"));
        assert!(store.get(2).is_err());
    }

    #[test]
    fn empty_candidates_is_fatal() {
        let result = CredentialStore::from_candidates(vec![]);
        assert!(matches!(result, Err(CredentialStoreError::NoneAvailable)));
    }

    #[test]
    fn all_invalid_is_fatal() {
        let result = CredentialStore::from_candidates(vec![(1, "nope".to_string())]);
        assert!(matches!(result, Err(CredentialStoreError::NoneAvailable)));
    }
}
