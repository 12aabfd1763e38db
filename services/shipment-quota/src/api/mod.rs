use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::guard::QuotaGuard;
use crate::scheduler::ResetScheduler;
use crate::storage::SubscriptionDatabase;

pub struct ApiState {
    pub guard: QuotaGuard,
    pub scheduler: ResetScheduler,
    pub database: Arc<SubscriptionDatabase>,
}

impl ApiState {
    pub fn new(
        guard: QuotaGuard,
        scheduler: ResetScheduler,
        database: Arc<SubscriptionDatabase>,
    ) -> Self {
        Self {
            guard,
            scheduler,
            database,
        }
    }
}
