use serde::{Deserialize, Serialize};

use crate::guard::CommitOutcome;
use crate::scheduler::{ResetRun, SchedulerStatus};
use crate::subscription::Subscription;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckQuotaRequest {
    pub subscriber_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitUsageRequest {
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitUsageResponse {
    pub subscription_id: String,
    pub outcome: CommitOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEnvelope {
    pub subscription: Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerActionResponse {
    pub changed: bool,
    pub status: SchedulerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireResetResponse {
    pub run: ResetRun,
    pub status: SchedulerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
}
