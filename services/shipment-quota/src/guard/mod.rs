pub mod decision;
pub mod error;
pub mod quota_guard;

pub use decision::{CommitOutcome, DenialReason, QuotaDecision, QuotaOutcome};
pub use error::GuardError;
pub use quota_guard::{CommitMode, QuotaGuard};

pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.90;
