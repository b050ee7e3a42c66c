//! Turning raw file changes into update payloads
//!
//! Decoding textures is out of scope; the default deriver reduces a change to
//! a content digest and only reports it when the bytes actually differ.

use super::watcher::FileChangeEvent;
use crate::error::Result;
use crate::types::UpdatePayload;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Produces the payload for a change, or `None` when nothing worth reporting changed
#[async_trait]
pub trait ChangeDeriver: Send + Sync {
    async fn derive(&self, event: &FileChangeEvent) -> Result<Option<UpdatePayload>>;

    /// Record the current state of a freshly watched path
    async fn prime(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Payload emitted by [`DigestDeriver`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChanged {
    pub target: String,
    pub path: String,
    /// SHA-256 of the new contents; `None` when the file is gone
    pub digest: Option<String>,
    pub size: Option<u64>,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Reports a change only when a file's SHA-256 differs from the last one seen
#[derive(Debug, Default)]
pub struct DigestDeriver {
    digests: Mutex<HashMap<PathBuf, String>>,
}

impl DigestDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last digest recorded for `path`
    pub fn digest_of(&self, path: impl AsRef<Path>) -> Option<String> {
        self.digests.lock().get(path.as_ref()).cloned()
    }

    pub async fn compute_file_hash(path: impl AsRef<Path>) -> Result<(String, u64)> {
        let mut file = tokio::fs::File::open(path.as_ref()).await?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        let mut size = 0u64;

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            size += bytes_read as u64;
            hasher.update(&buffer[..bytes_read]);
        }

        Ok((hex::encode(hasher.finalize()), size))
    }
}

#[async_trait]
impl ChangeDeriver for DigestDeriver {
    async fn derive(&self, event: &FileChangeEvent) -> Result<Option<UpdatePayload>> {
        let path = &event.path;

        let (digest, size) = if path.is_file() {
            let (digest, size) = Self::compute_file_hash(path).await?;
            let previous = self.digests.lock().insert(path.clone(), digest.clone());
            if previous.as_deref() == Some(digest.as_str()) {
                trace!("Content unchanged: {:?}", path);
                return Ok(None);
            }
            (Some(digest), Some(size))
        } else if !path.exists() {
            if self.digests.lock().remove(path).is_none() {
                trace!("Removal of an untracked path: {:?}", path);
                return Ok(None);
            }
            (None, None)
        } else {
            // Directory metadata churn
            return Ok(None);
        };

        debug!("Derived change for {:?} (digest {:?})", path, digest);
        let change = ResourceChanged {
            target: event.target.to_string(),
            path: path.to_string_lossy().to_string(),
            digest,
            size,
            detected_at: event.timestamp,
        };
        Ok(Some(UpdatePayload::from_json(&change)?))
    }

    async fn prime(&self, path: &Path) -> Result<()> {
        let files: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect();

        for file in files {
            let (digest, _) = Self::compute_file_hash(&file).await?;
            self.digests.lock().insert(file, digest);
        }
        Ok(())
    }
}
