//! Durable operator channel record.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Record {
    operator_channel_id: Option<i64>,
}

/// Holds the operator chat id. Written at most once per process.
pub struct ChannelStore {
    path: PathBuf,
    channel: Mutex<Option<i64>>,
}

impl ChannelStore {
    /// Load the record at `path`. A missing file means no channel yet; an
    /// unreadable or corrupt one is logged and treated the same way.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let channel = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Record>(&raw) {
                Ok(record) => record.operator_channel_id,
                Err(e) => {
                    tracing::error!("ignoring corrupt data file {}: {e}", path.display());
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::error!("failed to read data file {}: {e}", path.display());
                None
            }
        };
        if let Some(id) = channel {
            tracing::debug!("operator channel {id} loaded from {}", path.display());
        }
        Self {
            path,
            channel: Mutex::new(channel),
        }
    }

    pub fn get(&self) -> Option<i64> {
        *self.channel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist `id` if no channel is set yet. Returns `true` when it was
    /// stored, `false` when a channel already existed.
    pub fn remember(&self, id: i64) -> Result<bool, StoreError> {
        let mut channel = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        if channel.is_some() {
            return Ok(false);
        }

        let body = serde_json::to_string_pretty(&Record {
            operator_channel_id: Some(id),
        })?;
        self.write(&body).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        *channel = Some(id);
        tracing::info!("operator channel set to {id}");
        Ok(true)
    }

    fn write(&self, body: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)
    }
}
