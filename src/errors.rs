//! Error taxonomy for the proxy services.

use birdboard_detection_client::UpstreamError;
use birdboard_snapshot_store::SnapError;
use thiserror::Error;

/// Why a summary rebuild failed. Cloned into every waiter of a shared rebuild.
#[derive(Clone, Debug, Error)]
pub enum SummaryError {
    #[error("summary scan exceeded the ceiling of {limit} pages")]
    PageLimitExceeded { limit: usize },
    #[error("summary scan failed at offset {offset}: {source}")]
    Upstream {
        offset: usize,
        #[source]
        source: UpstreamError,
    },
    #[error("summary rebuild task aborted: {0}")]
    Aborted(String),
}

impl SummaryError {
    /// Failures that retrying will not fix: the upstream broke its contract.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            SummaryError::PageLimitExceeded { .. } => true,
            SummaryError::Upstream { source, .. } => {
                matches!(source, UpstreamError::Payload(_))
            }
            SummaryError::Aborted(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("recent detections fetch failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("recent snapshot could not be stored: {0}")]
    Persist(#[from] SnapError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FamilyError {
    /// No summary snapshot exists yet to draw candidates from.
    #[error("summary snapshot not ready")]
    NotReady,
    #[error("family resolution task aborted: {0}")]
    Aborted(String),
}
