pub mod api;
pub mod config;
pub mod guard;
pub mod scheduler;
pub mod storage;
pub mod subscription;

pub use api::{create_router, ApiState};
pub use config::QuotaServiceConfig;
pub use guard::{CommitMode, CommitOutcome, DenialReason, GuardError, QuotaDecision, QuotaGuard};
pub use scheduler::{ResetSchedule, ResetScheduler, SchedulerPhase, SchedulerStatus};
pub use storage::{ResetOutcome, StorageError, SubscriptionDatabase, SubscriptionStore};
pub use subscription::{
    NewSubscription, Subscription, SubscriptionContext, SubscriptionStatus, SubscriptionTier,
};
