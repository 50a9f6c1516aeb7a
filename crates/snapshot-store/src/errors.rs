use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a snapshot could not be written. Read failures are never errors.
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("failed to encode snapshot for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SnapError {
    pub fn path(&self) -> &PathBuf {
        match self {
            SnapError::Encode { path, .. } | SnapError::Io { path, .. } => path,
        }
    }
}
