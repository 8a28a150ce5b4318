//! Durable journal of abandoned update batches.
//!
//! One JSON object per line, append-only between drains. The queue writes
//! here at the moment a batch is abandoned; a later session can [`drain`]
//! the file and re-enqueue whatever it wants to retry.
//!
//! [`drain`]: Journal::drain

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::model::Timestamp;
use crate::utils::now_ms;

/// One abandoned batch, as serialized to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedBatch<K, V> {
    /// When the batch was abandoned, milliseconds since the Unix epoch.
    pub abandoned_at: Timestamp,
    /// Consecutive failed flush attempts at the moment it was dropped;
    /// zero for updates that never got an attempt before shutdown.
    pub attempts: u32,
    /// The pending updates, in no particular order.
    pub updates: Vec<(K, V)>,
}

/// Append-only JSONL file of abandoned batches.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    /// Open a journal for appending, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Io` if the file cannot be opened or created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one batch and flush it to the OS before returning.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serde` if a key or value cannot be encoded and
    /// `SyncError::Io` if the write fails.
    pub async fn append<K, V>(
        &self,
        attempts: u32,
        updates: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        let batch = AbandonedBatch {
            abandoned_at: now_ms(),
            attempts,
            updates: updates.into_iter().collect(),
        };
        let mut line = serde_json::to_string(&batch)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        log::debug!("journaled a batch of {} update(s)", batch.updates.len());
        Ok(())
    }

    /// Read every batch without consuming the file. Corrupt lines are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Io` if the file cannot be read.
    pub async fn entries<K, V>(&self) -> Result<Vec<AbandonedBatch<K, V>>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        // Hold the append lock so a batch landing mid-read cannot tear.
        let _file = self.file.lock().await;
        read_batches(&self.path).await
    }

    /// Read every batch and truncate the file, handing ownership of the
    /// batches to the caller.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Io` if the file cannot be read or truncated.
    pub async fn drain<K, V>(&self) -> Result<Vec<AbandonedBatch<K, V>>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let file = self.file.lock().await;
        let batches = read_batches(&self.path).await?;
        file.set_len(0).await?;
        Ok(batches)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

async fn read_batches<K, V>(path: &Path) -> Result<Vec<AbandonedBatch<K, V>>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let mut batches = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(batch) => batches.push(batch),
            Err(error) => log::warn!("skipping corrupt journal line: {error}"),
        }
    }
    Ok(batches)
}
