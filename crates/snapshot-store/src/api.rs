use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use birdboard_core_types::{age_of, Timestamped};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::SnapError;
use crate::fs::reader as fs_reader;
use crate::fs::writer as fs_writer;

pub type SnapResult<T> = Result<T, SnapError>;

/// Loads a snapshot, treating every failure as a cache miss.
///
/// Missing files, unreadable files, malformed JSON and payloads whose
/// `generated_at` cannot be parsed all yield `None`.
pub async fn load<T>(path: &Path) -> Option<T>
where
    T: DeserializeOwned + Timestamped,
{
    let bytes = match fs_reader::read_if_exists(path).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!(path = %path.display(), "snapshot not present");
            return None;
        }
        Err(err) => {
            warn!(%err, path = %path.display(), "failed to read snapshot");
            return None;
        }
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(snapshot) if snapshot.generated_at().timestamp_millis() > 0 => Some(snapshot),
        Ok(_) => {
            warn!(path = %path.display(), "snapshot carries no usable generated_at");
            None
        }
        Err(err) => {
            warn!(%err, path = %path.display(), "failed to parse snapshot");
            None
        }
    }
}

/// Serializes `payload` and atomically replaces the file at `path`.
pub async fn save<T>(path: &Path, payload: &T) -> SnapResult<()>
where
    T: Serialize,
{
    let data = serde_json::to_vec(payload).map_err(|source| SnapError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs_writer::write_atomic(path, &data)
        .await
        .map_err(|source| SnapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), bytes = data.len(), "snapshot stored");
    Ok(())
}

/// A fixed path bound to the payload type stored there.
pub struct SnapshotFile<T> {
    path: PathBuf,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for SnapshotFile<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SnapshotFile<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFile")
            .field("path", &self.path)
            .finish()
    }
}

impl<T> SnapshotFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _payload: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> SnapshotFile<T>
where
    T: Serialize + DeserializeOwned + Timestamped,
{
    pub async fn load(&self) -> Option<T> {
        load(&self.path).await
    }

    pub async fn save(&self, payload: &T) -> SnapResult<()> {
        save(&self.path, payload).await
    }

    /// Age of the stored snapshot, `None` when nothing usable is on disk.
    pub async fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.load()
            .await
            .map(|snapshot| age_of(snapshot.generated_at(), now))
    }
}
