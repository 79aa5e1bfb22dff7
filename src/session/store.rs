//! Persistence for session artifacts: cookie blobs and challenge images

use super::SessionError;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Storage backend for per-channel session artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Previously saved cookie blob, if any
    async fn load_cookies(&self, channel: &str) -> Result<Option<Vec<u8>>, SessionError>;

    async fn save_cookies(&self, channel: &str, blob: &[u8]) -> Result<(), SessionError>;

    /// Save a challenge image, returning where it was written
    async fn save_challenge(&self, channel: &str, image: &[u8])
        -> Result<Option<PathBuf>, SessionError>;
}

/// File-based store under `<base>/<channel>/`
pub struct FileArtifactStore {
    base_path: PathBuf,
    persist_cookies: bool,
}

impl FileArtifactStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            persist_cookies: true,
        }
    }

    /// Keep challenge images but never read or write cookies
    pub fn without_cookies(mut self) -> Self {
        self.persist_cookies = false;
        self
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        let safe: String = channel
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(safe)
    }

    fn cookie_path(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("cookies.json")
    }
}

fn store_error(context: &str, err: std::io::Error) -> SessionError {
    SessionError::Store(format!("{context}: {err}"))
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn load_cookies(&self, channel: &str) -> Result<Option<Vec<u8>>, SessionError> {
        if !self.persist_cookies {
            return Ok(None);
        }
        let path = self.cookie_path(channel);
        if !path.exists() {
            return Ok(None);
        }
        let blob = fs::read(&path)
            .await
            .map_err(|e| store_error("reading cookies", e))?;
        debug!("Loaded {} cookie bytes for {}", blob.len(), channel);
        Ok(Some(blob))
    }

    async fn save_cookies(&self, channel: &str, blob: &[u8]) -> Result<(), SessionError> {
        if !self.persist_cookies {
            return Ok(());
        }
        fs::create_dir_all(self.channel_dir(channel))
            .await
            .map_err(|e| store_error("creating session directory", e))?;
        fs::write(self.cookie_path(channel), blob)
            .await
            .map_err(|e| store_error("writing cookies", e))
    }

    async fn save_challenge(
        &self,
        channel: &str,
        image: &[u8],
    ) -> Result<Option<PathBuf>, SessionError> {
        let dir = self.channel_dir(channel);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| store_error("creating session directory", e))?;
        let path = dir.join(format!(
            "challenge-{}.png",
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        fs::write(&path, image)
            .await
            .map_err(|e| store_error("writing challenge image", e))?;
        Ok(Some(path))
    }
}
