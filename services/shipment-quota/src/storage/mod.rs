pub mod database;
pub mod error;
pub mod schema;
pub mod store;

pub use database::SubscriptionDatabase;
pub use error::StorageError;
pub use store::{ResetOutcome, SubscriptionStore};

pub const SUBSCRIPTION_DB_FILENAME: &str = "subscriptions.db";
