//! Persistent auth token.
//!
//! The token lives in a small preferences file at
//! `~/.config/blackholio/prefs.toml`, one string value per key. Other keys in
//! the file are left alone on save.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Preference key holding the auth token.
pub const TOKEN_KEY: &str = "spacetimedb.identity_token";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("can't read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("can't write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad preferences file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("can't serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn prefs_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blackholio")
}

/// Reads and writes the auth token under one preference key.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    key: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: TOKEN_KEY.to_string(),
        }
    }

    pub fn default_path() -> PathBuf {
        prefs_dir().join("prefs.toml")
    }

    /// Store under a different key, e.g. one per test profile.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved token. A missing file, missing key or empty value is `None`.
    pub fn load(&self) -> Result<Option<String>, CredentialError> {
        let prefs = self.read_prefs()?;
        Ok(prefs.get(&self.key).filter(|t| !t.is_empty()).cloned())
    }

    /// Overwrite the saved token.
    pub fn save(&self, token: &str) -> Result<(), CredentialError> {
        let mut prefs = self.read_prefs()?;
        prefs.insert(self.key.clone(), token.to_string());
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| CredentialError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let body = toml::to_string_pretty(&prefs)?;
        std::fs::write(&self.path, body).map_err(|source| CredentialError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "auth token saved");
        Ok(())
    }

    fn read_prefs(&self) -> Result<BTreeMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let body = std::fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.clone(),
            source,
        })?;
        toml::from_str(&body).map_err(|source| CredentialError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}
