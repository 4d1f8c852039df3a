//! Store error type.

use duet_common::error::DuetError;

/// Failure talking to, or decoding data from, the session store.
///
/// Transient from the coordinator's point of view: the caller retries on its
/// next poll tick.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for DuetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(e) => DuetError::Database(e),
        }
    }
}
