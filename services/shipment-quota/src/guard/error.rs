use thiserror::Error;

use crate::storage::StorageError;

/// Failures of the gate itself. Policy denials are not errors; they are
/// reported through [`super::QuotaDecision::Denied`].
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("subscriber id cannot be empty")]
    InvalidSubscriber,
    #[error("unable to determine quota: {0}")]
    Storage(#[from] StorageError),
}
