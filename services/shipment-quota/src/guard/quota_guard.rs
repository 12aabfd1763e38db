use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::QuotaServiceConfig;
use crate::storage::SubscriptionStore;

use super::decision::{CommitOutcome, DenialReason, QuotaDecision};
use super::error::GuardError;
use super::DEFAULT_WARNING_THRESHOLD;

/// How the post-success step records usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Plain atomic increment. Concurrent admits near the limit may overshoot
    /// by at most the number of in-flight requests; the next check denies.
    #[default]
    Unbounded,
    /// Atomic increment-if-below-limit; usage never exceeds the limit.
    Ceiling,
}

impl FromStr for CommitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unbounded" => Ok(CommitMode::Unbounded),
            "ceiling" => Ok(CommitMode::Ceiling),
            _ => anyhow::bail!("unsupported commit mode: {s}"),
        }
    }
}

/// Check/commit pair gating shipment creation against the monthly allowance.
///
/// `check_and_reserve` never writes, so a failed shipment does not consume
/// quota. `commit` runs only after the shipment exists.
#[derive(Clone)]
pub struct QuotaGuard {
    store: Arc<dyn SubscriptionStore>,
    warning_threshold: f64,
    commit_mode: CommitMode,
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            commit_mode: CommitMode::default(),
        }
    }

    pub fn from_config(store: Arc<dyn SubscriptionStore>, config: &QuotaServiceConfig) -> Self {
        Self::new(store)
            .with_warning_threshold(config.warning_threshold)
            .with_commit_mode(config.commit_mode)
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn check_and_reserve(&self, subscriber_id: &str) -> Result<QuotaDecision, GuardError> {
        let subscriber_id = subscriber_id.trim();
        if subscriber_id.is_empty() {
            return Err(GuardError::InvalidSubscriber);
        }

        let Some(subscription) = self.store.get_active_subscription(subscriber_id)? else {
            info!(subscriber_id, "denied shipment: no active subscription");
            return Ok(QuotaDecision::Denied {
                reason: DenialReason::NoActiveSubscription,
                context: None,
            });
        };

        let context = subscription.context();
        if subscription.is_limit_reached() {
            info!(
                subscriber_id,
                subscription_id = %context.subscription_id,
                usage = context.usage,
                limit = context.limit,
                tier = %context.tier,
                "denied shipment: monthly limit reached"
            );
            return Ok(QuotaDecision::Denied {
                reason: DenialReason::LimitReached,
                context: Some(context),
            });
        }

        let warning = subscription.usage_ratio() >= self.warning_threshold;
        if warning {
            debug!(
                subscriber_id,
                usage = context.usage,
                limit = context.limit,
                "subscriber approaching monthly limit"
            );
        }

        Ok(QuotaDecision::Admitted { context, warning })
    }

    /// Records one unit of usage. Failures are logged and swallowed: the
    /// shipment already exists and is never rolled back, and retrying could
    /// double count a write whose acknowledgement was lost.
    pub fn commit(&self, subscription_id: &str) -> CommitOutcome {
        let result = match self.commit_mode {
            CommitMode::Unbounded => self
                .store
                .increment_usage(subscription_id)
                .map(|_| CommitOutcome::Recorded),
            CommitMode::Ceiling => self
                .store
                .increment_usage_within_limit(subscription_id)
                .map(|recorded| {
                    if recorded {
                        CommitOutcome::Recorded
                    } else {
                        CommitOutcome::CeilingReached
                    }
                }),
        };

        match result {
            Ok(CommitOutcome::CeilingReached) => {
                warn!(
                    subscription_id,
                    "usage increment rejected at the monthly ceiling"
                );
                CommitOutcome::CeilingReached
            }
            Ok(outcome) => {
                debug!(subscription_id, "recorded shipment usage");
                outcome
            }
            Err(err) => {
                error!(
                    subscription_id,
                    delta = 1,
                    error = %err,
                    "failed to record shipment usage"
                );
                CommitOutcome::Failed
            }
        }
    }
}
