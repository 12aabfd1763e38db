use rusqlite::Connection;

use super::error::StorageError;

pub const SUBSCRIPTIONS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    subscriber_id TEXT NOT NULL,
    tier TEXT NOT NULL,
    monthly_shipment_limit INTEGER NOT NULL CHECK (monthly_shipment_limit > 0),
    current_usage INTEGER NOT NULL DEFAULT 0 CHECK (current_usage >= 0),
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_reset_at TEXT
);
"#;

// One active row per subscriber; historical rows are unconstrained.
pub const SUBSCRIPTIONS_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
    ON subscriptions(subscriber_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber_status
    ON subscriptions(subscriber_id, status);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(SUBSCRIPTIONS_TABLE_SCHEMA)?;
    conn.execute_batch(SUBSCRIPTIONS_INDEXES)?;
    Ok(())
}
