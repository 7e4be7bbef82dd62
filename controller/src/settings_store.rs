use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use greenhouse_common::{ConfigError, Fingerprint, Settings};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Owns the live settings snapshot. Readers clone the `Arc` once per tick;
/// a reload swaps the pointer and never edits a snapshot in place.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Arc<Settings>,
    rejected: Option<Fingerprint>,
}

impl SettingsStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let current = Arc::new(load_from(&path).await?);
        info!(component = "settings", path = %path.display(), "settings loaded");
        Ok(Self {
            path,
            current,
            rejected: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.current)
    }

    pub async fn load(&self) -> Result<Settings, ConfigError> {
        load_from(&self.path).await
    }

    /// True when the file content differs from the live snapshot and from the
    /// last content that failed to load.
    pub async fn poll_for_change(&self) -> bool {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(component = "settings", path = %self.path.display(), "settings file unreadable: {err}");
                return false;
            }
        };

        let seen = fingerprint(&raw);
        self.current.fingerprint != Some(seen) && self.rejected != Some(seen)
    }

    /// Replaces the snapshot on success. On failure the previous snapshot
    /// stays live and the offending content is remembered so it is not
    /// retried until the file changes again.
    pub async fn reload(&mut self) -> Result<Arc<Settings>, ConfigError> {
        let raw = read(&self.path).await?;
        let seen = fingerprint(&raw);

        match parse(&self.path, &raw) {
            Ok(next) => {
                self.current = Arc::new(next);
                self.rejected = None;
                Ok(self.snapshot())
            }
            Err(err) => {
                self.rejected = Some(seen);
                Err(err)
            }
        }
    }
}

pub fn fingerprint(raw: &[u8]) -> Fingerprint {
    Fingerprint {
        len: raw.len() as u64,
        digest: Sha256::digest(raw).into(),
    }
}

async fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let raw = read(path).await?;
    parse(path, &raw)
}

async fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse(path: &Path, raw: &[u8]) -> Result<Settings, ConfigError> {
    let mut settings = Settings::from_json(raw)?;
    settings.path = Some(path.to_path_buf());
    settings.fingerprint = Some(fingerprint(raw));
    Ok(settings)
}
