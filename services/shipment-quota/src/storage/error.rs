use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),
    #[error("subscriber {0} already has an active subscription")]
    ActiveSubscriptionExists(String),
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),
    #[error("database connection lock poisoned")]
    ConnectionPoisoned,
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
