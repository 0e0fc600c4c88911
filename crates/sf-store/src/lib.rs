//! SmsFlow persistence layer.
//!
//! SQLite repositories for the four collections (campaigns, messages,
//! recipients, quota balances) plus the quota ledger's atomic
//! reserve/release operations. Timestamps are stored as epoch millis.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod campaigns;
pub mod messages;
pub mod quota;
pub mod recipients;

pub use campaigns::CampaignRepository;
pub use messages::{CampaignTotals, MessageRepository};
pub use quota::{QuotaError, QuotaLedger, Reservation};
pub use recipients::{RecipientCounts, RecipientRepository};

/// Persistence failures. The only error class treated as fatal to a
/// surrounding dispatch or reconciliation operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown {column} value in row: {value}")]
    InvalidColumn { column: &'static str, value: String },

    #[error("invalid timestamp in column {column}")]
    InvalidTimestamp { column: &'static str },
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn opt_to_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_millis)
}

pub(crate) fn from_millis(ms: i64, column: &'static str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp { column })
}

pub(crate) fn opt_from_millis(
    ms: Option<i64>,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    ms.map(|v| from_millis(v, column)).transpose()
}

#[cfg(test)]
pub(crate) mod testutil {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    /// Shared in-memory database. One connection so every repository sees
    /// the same schema.
    pub async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }
}
