use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subscription::Subscription;

use super::error::StorageError;

/// Result of a bulk usage reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Operations the quota guard and reset scheduler need from the backing
/// store. Every mutating call must be a single atomic statement at the store
/// level; callers never read-modify-write.
pub trait SubscriptionStore: Send + Sync {
    fn get_active_subscription(
        &self,
        subscriber_id: &str,
    ) -> Result<Option<Subscription>, StorageError>;

    fn increment_usage(&self, subscription_id: &str) -> Result<(), StorageError>;

    /// Increments only while `current_usage < monthly_shipment_limit`.
    /// Returns `false` when the ceiling rejected the increment.
    fn increment_usage_within_limit(&self, subscription_id: &str) -> Result<bool, StorageError>;

    /// Zeroes `current_usage` on every active subscription in one
    /// set-based update.
    fn reset_all_usage(&self) -> Result<ResetOutcome, StorageError>;
}
