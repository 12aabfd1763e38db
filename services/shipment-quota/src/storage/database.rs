use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::subscription::{NewSubscription, Subscription, SubscriptionStatus};

use super::error::StorageError;
use super::schema::init_database;
use super::store::{ResetOutcome, SubscriptionStore};
use super::SUBSCRIPTION_DB_FILENAME;

const SUBSCRIPTION_COLUMNS: &str = "id, subscriber_id, tier, monthly_shipment_limit, \
     current_usage, status, created_at, updated_at, last_reset_at";

/// SQLite-backed subscription store. A single connection sits behind a mutex,
/// so every statement below is serialized at the store level.
pub struct SubscriptionDatabase {
    conn: Mutex<Connection>,
}

impl SubscriptionDatabase {
    pub fn open(data_dir: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(SUBSCRIPTION_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        debug!(path = %db_path.display(), "opened subscription database");
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        init_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }

    pub fn create_subscription(
        &self,
        request: &NewSubscription,
    ) -> Result<Subscription, StorageError> {
        let subscriber_id = request.subscriber_id.trim();
        if subscriber_id.is_empty() {
            return Err(StorageError::InvalidSubscription(
                "subscriber_id cannot be empty".into(),
            ));
        }
        if request.monthly_shipment_limit == 0 {
            return Err(StorageError::InvalidSubscription(
                "monthly_shipment_limit must be greater than zero".into(),
            ));
        }
        let limit = to_sql_count(request.monthly_shipment_limit, "monthly_shipment_limit")?;

        let now = Utc::now().to_rfc3339();
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.to_string(),
            tier: request.tier,
            monthly_shipment_limit: request.monthly_shipment_limit,
            current_usage: 0,
            status: request.status,
            created_at: now.clone(),
            updated_at: now,
            last_reset_at: None,
        };

        let conn = self.connection()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO subscriptions (
                id, subscriber_id, tier, monthly_shipment_limit, current_usage,
                status, created_at, updated_at, last_reset_at
            )
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, NULL)
            "#,
            params![
                subscription.id,
                subscription.subscriber_id,
                subscription.tier.as_str(),
                limit,
                subscription.status.as_str(),
                subscription.created_at,
                subscription.updated_at,
            ],
        );

        match inserted {
            Ok(_) => Ok(subscription),
            Err(err) if is_unique_violation(&err) => Err(StorageError::ActiveSubscriptionExists(
                subscription.subscriber_id,
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>, StorageError> {
        let conn = self.connection()?;
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1");
        let subscription = conn
            .query_row(&sql, params![subscription_id], row_to_subscription)
            .optional()?;
        Ok(subscription)
    }

    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>, StorageError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY subscriber_id, created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_subscription)?;

        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row?);
        }
        Ok(subscriptions)
    }

    pub fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let now = Utc::now().to_rfc3339();
        let changed = match conn.execute(
            "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![subscription_id, status.as_str(), now],
        ) {
            Ok(changed) => changed,
            Err(err) if is_unique_violation(&err) => {
                let subscriber_id: String = conn.query_row(
                    "SELECT subscriber_id FROM subscriptions WHERE id = ?1",
                    params![subscription_id],
                    |row| row.get(0),
                )?;
                return Err(StorageError::ActiveSubscriptionExists(subscriber_id));
            }
            Err(err) => return Err(err.into()),
        };
        if changed == 0 {
            return Err(StorageError::SubscriptionNotFound(subscription_id.to_string()));
        }
        Ok(())
    }

    /// Overwrites the usage counter. Intended for operator corrections and
    /// fixtures, never for the metered path.
    pub fn set_usage(&self, subscription_id: &str, usage: u64) -> Result<(), StorageError> {
        let usage = to_sql_count(usage, "current_usage")?;
        let conn = self.connection()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE subscriptions SET current_usage = ?2, updated_at = ?3 WHERE id = ?1",
            params![subscription_id, usage, now],
        )?;
        if changed == 0 {
            return Err(StorageError::SubscriptionNotFound(subscription_id.to_string()));
        }
        Ok(())
    }

    fn subscription_exists(conn: &Connection, subscription_id: &str) -> Result<bool, StorageError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM subscriptions WHERE id = ?1",
                params![subscription_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl SubscriptionStore for SubscriptionDatabase {
    fn get_active_subscription(
        &self,
        subscriber_id: &str,
    ) -> Result<Option<Subscription>, StorageError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE subscriber_id = ?1 AND status = 'active' \
             ORDER BY updated_at DESC LIMIT 1"
        );
        let subscription = conn
            .query_row(&sql, params![subscriber_id], row_to_subscription)
            .optional()?;
        Ok(subscription)
    }

    fn increment_usage(&self, subscription_id: &str) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            r#"
            UPDATE subscriptions
            SET current_usage = current_usage + 1, updated_at = ?2
            WHERE id = ?1
            "#,
            params![subscription_id, now],
        )?;
        if changed == 0 {
            return Err(StorageError::SubscriptionNotFound(subscription_id.to_string()));
        }
        Ok(())
    }

    fn increment_usage_within_limit(&self, subscription_id: &str) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            r#"
            UPDATE subscriptions
            SET current_usage = current_usage + 1, updated_at = ?2
            WHERE id = ?1 AND current_usage < monthly_shipment_limit
            "#,
            params![subscription_id, now],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        if !Self::subscription_exists(&conn, subscription_id)? {
            return Err(StorageError::SubscriptionNotFound(subscription_id.to_string()));
        }
        Ok(false)
    }

    fn reset_all_usage(&self) -> Result<ResetOutcome, StorageError> {
        let conn = self.connection()?;
        let reset_at = Utc::now();
        let stamp = reset_at.to_rfc3339();
        let changed = conn.execute(
            r#"
            UPDATE subscriptions
            SET current_usage = 0, last_reset_at = ?1, updated_at = ?1
            WHERE status = 'active'
            "#,
            params![stamp],
        )?;
        Ok(ResetOutcome {
            count: changed as u64,
            reset_at,
        })
    }
}

/// SQLite integers are signed; counts beyond `i64::MAX` cannot be stored.
fn to_sql_count(value: u64, field: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| {
        StorageError::InvalidSubscription(format!("{field} exceeds {}", i64::MAX))
    })
}

// Only the one-active-per-subscriber index is unique besides the primary key,
// which is always a fresh uuid.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let tier: String = row.get(2)?;
    let status: String = row.get(5)?;
    Ok(Subscription {
        id: row.get(0)?,
        subscriber_id: row.get(1)?,
        tier: tier
            .parse()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(err)))?,
        monthly_shipment_limit: row.get::<_, i64>(3)? as u64,
        current_usage: row.get::<_, i64>(4)? as u64,
        status: status
            .parse()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err)))?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_reset_at: row.get(8)?,
    })
}
