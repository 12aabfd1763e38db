use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "basic" => Ok(SubscriptionTier::Basic),
            "premium" => Ok(SubscriptionTier::Premium),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            _ => Err(UnknownVariant::new("tier", s)),
        }
    }
}

/// Only `Active` subscriptions take part in quota checks and bulk resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Suspended,
    Trial,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Trial => "trial",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            "suspended" => Ok(SubscriptionStatus::Suspended),
            "trial" => Ok(SubscriptionStatus::Trial),
            _ => Err(UnknownVariant::new("status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription {field}: {value}")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub subscriber_id: String,
    pub tier: SubscriptionTier,
    pub monthly_shipment_limit: u64,
    pub current_usage: u64,
    pub status: SubscriptionStatus,
    pub created_at: String,
    pub updated_at: String,
    pub last_reset_at: Option<String>,
}

impl Subscription {
    pub fn is_limit_reached(&self) -> bool {
        self.current_usage >= self.monthly_shipment_limit
    }

    /// Fraction of the monthly allowance already consumed.
    pub fn usage_ratio(&self) -> f64 {
        if self.monthly_shipment_limit == 0 {
            return 1.0;
        }
        self.current_usage as f64 / self.monthly_shipment_limit as f64
    }

    pub fn context(&self) -> SubscriptionContext {
        SubscriptionContext {
            subscription_id: self.id.clone(),
            subscriber_id: self.subscriber_id.clone(),
            tier: self.tier,
            usage: self.current_usage,
            limit: self.monthly_shipment_limit,
        }
    }
}

/// Snapshot attached to a quota decision; `subscription_id` is what the
/// post-success commit step increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionContext {
    pub subscription_id: String,
    pub subscriber_id: String,
    pub tier: SubscriptionTier,
    pub usage: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub subscriber_id: String,
    pub tier: SubscriptionTier,
    pub monthly_shipment_limit: u64,
    #[serde(default = "default_status")]
    pub status: SubscriptionStatus,
}

fn default_status() -> SubscriptionStatus {
    SubscriptionStatus::Active
}
