use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::{IdentityStore, TokenVerifier};
use crate::archive::SiteId;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read users file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse users file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate user {0}")]
    DuplicateUser(String),

    #[error("user {username} has an invalid token digest")]
    InvalidDigest { username: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub sites: BTreeSet<SiteId>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Lowercase hex SHA-256 of the user's bearer token.
    pub token_sha256: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// Users loaded from a TOML file. Tokens are never stored, only digests.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserRecord>,
    by_digest: HashMap<String, String>,
}

impl UserDirectory {
    /// Load the users file. A missing file yields an empty directory, which
    /// rejects every token.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        if !path.exists() {
            warn!("Users file {} not found, all requests will be rejected", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| IdentityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let directory = Self::parse(&content).map_err(|e| match e {
            IdentityError::Parse { source, .. } => IdentityError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        info!("Loaded {} users from {}", directory.users.len(), path.display());
        Ok(directory)
    }

    pub fn parse(content: &str) -> Result<Self, IdentityError> {
        let file: UsersFile = toml::from_str(content).map_err(|source| IdentityError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        Self::from_records(file.users)
    }

    pub fn from_records(records: Vec<UserRecord>) -> Result<Self, IdentityError> {
        let mut directory = Self::default();

        for mut record in records {
            record.token_sha256 = record.token_sha256.trim().to_ascii_lowercase();
            let digest_ok = record.token_sha256.len() == 64
                && record.token_sha256.bytes().all(|b| b.is_ascii_hexdigit());
            if !digest_ok {
                return Err(IdentityError::InvalidDigest {
                    username: record.username,
                });
            }
            if directory.users.contains_key(&record.username) {
                return Err(IdentityError::DuplicateUser(record.username));
            }

            directory
                .by_digest
                .insert(record.token_sha256.clone(), record.username.clone());
            directory.users.insert(record.username.clone(), record);
        }

        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn active(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username).filter(|u| u.active)
    }
}

impl IdentityStore for UserDirectory {
    fn sites_for(&self, username: &str) -> BTreeSet<SiteId> {
        self.active(username).map(|u| u.sites.clone()).unwrap_or_default()
    }

    fn is_admin(&self, username: &str) -> bool {
        self.active(username).is_some_and(|u| u.role == Role::Admin)
    }
}

impl TokenVerifier for UserDirectory {
    fn verify(&self, token: &str) -> Option<String> {
        let username = self.by_digest.get(&token_digest(token))?;
        self.active(username).map(|u| u.username.clone())
    }
}

/// Lowercase hex SHA-256 of a bearer token, as stored in the users file.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
