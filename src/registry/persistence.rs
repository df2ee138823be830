//! JSON persistence for the registry's candidate logs
//!
//! Only the logs and their sighting windows are stored. Loading replays
//! them through the registry's merge, so a reloaded profile is always a
//! product of the merge.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::DeviceRegistry;
use crate::correlator::DeviceEvidence;
use crate::error::{Error, Result};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRegistry {
    version: u32,
    saved_at: DateTime<Utc>,
    /// One entry per address, ascending
    devices: Vec<DeviceEvidence>,
}

/// File-backed store for a `DeviceRegistry`
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every candidate log; temp file + rename so a crash never
    /// leaves a truncated file behind
    pub async fn save(&self, registry: &DeviceRegistry) -> Result<usize> {
        let devices = registry.evidence().await;
        let count = devices.len();
        let stored = StoredRegistry {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            devices,
        };
        let json = serde_json::to_vec_pretty(&stored)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::info!(path = %self.path.display(), devices = count, "Registry saved");
        Ok(count)
    }

    /// Replay the stored logs into `registry`. A missing file is an empty
    /// registry. Returns the number of devices replayed.
    pub async fn load_into(&self, registry: &DeviceRegistry) -> Result<usize> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No stored registry");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredRegistry = serde_json::from_slice(&bytes)?;
        if stored.version != FORMAT_VERSION {
            return Err(Error::Config(format!(
                "unsupported registry format version {} in {}",
                stored.version,
                self.path.display()
            )));
        }

        let summary = registry.replay(&stored.devices).await;

        tracing::info!(
            path = %self.path.display(),
            devices = stored.devices.len(),
            records = summary.records,
            saved_at = %stored.saved_at,
            "Registry loaded"
        );
        Ok(summary.touched().count())
    }
}
