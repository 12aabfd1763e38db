use serde::{Deserialize, Serialize};

use crate::subscription::{SubscriptionContext, SubscriptionTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NoActiveSubscription,
    LimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Admitted {
        context: SubscriptionContext,
        warning: bool,
    },
    Denied {
        reason: DenialReason,
        context: Option<SubscriptionContext>,
    },
}

impl QuotaDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, QuotaDecision::Admitted { .. })
    }

    pub fn warning(&self) -> bool {
        matches!(self, QuotaDecision::Admitted { warning: true, .. })
    }

    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            QuotaDecision::Admitted { .. } => None,
            QuotaDecision::Denied { reason, .. } => Some(*reason),
        }
    }

    pub fn context(&self) -> Option<&SubscriptionContext> {
        match self {
            QuotaDecision::Admitted { context, .. } => Some(context),
            QuotaDecision::Denied { context, .. } => context.as_ref(),
        }
    }

    /// Flattened shape handed to the request-handling layer.
    pub fn to_outcome(&self) -> QuotaOutcome {
        let context = self.context();
        QuotaOutcome {
            admitted: self.is_admitted(),
            reason: self.reason(),
            warning: self.warning(),
            subscription_id: context.map(|ctx| ctx.subscription_id.clone()),
            usage: context.map(|ctx| ctx.usage),
            limit: context.map(|ctx| ctx.limit),
            tier: context.map(|ctx| ctx.tier),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaOutcome {
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    pub warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub usage: Option<u64>,
    pub limit: Option<u64>,
    pub tier: Option<SubscriptionTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Recorded,
    /// Ceiling mode only: the store refused to go past the limit.
    CeilingReached,
    /// Logged and dropped; the next monthly reset clears any drift.
    Failed,
}
