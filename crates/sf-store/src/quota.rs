//! Quota ledger.
//!
//! Check-and-reserve runs as a single guarded UPDATE, so two concurrent
//! dispatches for the same account can never jointly overdraw the balance.
//! The balance only ever decreases by the count of recipients the provider
//! accepted: the unused part of a reservation is credited back on release.

use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

use chrono::Utc;
use sf_common::QuotaBalance;

use crate::{from_millis, to_millis, Result, StoreError};

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("insufficient credits for account {account_id}: requested {requested}, available {available}")]
    InsufficientCredits {
        account_id: String,
        requested: i64,
        available: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        QuotaError::Store(StoreError::Database(err))
    }
}

/// A held, uncommitted claim against an account's balance. Must be released
/// exactly once with the actually-used count.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub account_id: String,
    pub reserved: i64,
}

#[derive(Clone)]
pub struct QuotaLedger {
    pool: SqlitePool,
}

impl QuotaLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS quota_balances (
                account_id TEXT PRIMARY KEY,
                remaining_credits INTEGER NOT NULL DEFAULT 0 CHECK (remaining_credits >= 0),
                total_sent INTEGER NOT NULL DEFAULT 0,
                total_delivered INTEGER NOT NULL DEFAULT 0,
                total_failed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create the balance row for an account if it does not exist yet.
    pub async fn ensure_account(&self, account_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO quota_balances (account_id, remaining_credits, updated_at) \
             VALUES (?, 0, ?)",
        )
        .bind(account_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_credits(&self, account_id: &str, amount: i64) -> Result<()> {
        self.ensure_account(account_id).await?;
        sqlx::query(
            "UPDATE quota_balances SET remaining_credits = remaining_credits + ?, \
             updated_at = ? WHERE account_id = ?",
        )
        .bind(amount)
        .bind(to_millis(Utc::now()))
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        info!(account_id = %account_id, amount, "Added credits");
        Ok(())
    }

    pub async fn balance(&self, account_id: &str) -> Result<Option<QuotaBalance>> {
        let row = sqlx::query("SELECT * FROM quota_balances WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(QuotaBalance {
                account_id: row.get("account_id"),
                remaining_credits: row.get("remaining_credits"),
                total_sent: row.get("total_sent"),
                total_delivered: row.get("total_delivered"),
                total_failed: row.get("total_failed"),
                updated_at: from_millis(row.get("updated_at"), "updated_at")?,
            })
        })
        .transpose()
    }

    /// Atomically check and decrement the balance. The guard in the WHERE
    /// clause makes the check-and-decrement a single unit; zero rows
    /// affected means the credits were not there.
    pub async fn reserve(
        &self,
        account_id: &str,
        n: i64,
    ) -> std::result::Result<Reservation, QuotaError> {
        let result = sqlx::query(
            "UPDATE quota_balances SET remaining_credits = remaining_credits - ?, \
             updated_at = ? WHERE account_id = ? AND remaining_credits >= ?",
        )
        .bind(n)
        .bind(to_millis(Utc::now()))
        .bind(account_id)
        .bind(n)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let available = self
                .balance(account_id)
                .await?
                .map(|b| b.remaining_credits)
                .unwrap_or(0);
            return Err(QuotaError::InsufficientCredits {
                account_id: account_id.to_string(),
                requested: n,
                available,
            });
        }

        debug!(account_id = %account_id, reserved = n, "Reserved credits");
        Ok(Reservation {
            account_id: account_id.to_string(),
            reserved: n,
        })
    }

    /// Settle a reservation after the provider responded: credits for
    /// recipients that were not accepted flow back to the account.
    pub async fn release(&self, reservation: Reservation, actually_used: i64) -> Result<()> {
        let refund = (reservation.reserved - actually_used).max(0);
        if refund == 0 {
            debug!(account_id = %reservation.account_id, used = actually_used, "Reservation fully consumed");
            return Ok(());
        }

        sqlx::query(
            "UPDATE quota_balances SET remaining_credits = remaining_credits + ?, \
             updated_at = ? WHERE account_id = ?",
        )
        .bind(refund)
        .bind(to_millis(Utc::now()))
        .bind(&reservation.account_id)
        .execute(&self.pool)
        .await?;

        debug!(
            account_id = %reservation.account_id,
            reserved = reservation.reserved,
            used = actually_used,
            refund,
            "Released unused reservation"
        );
        Ok(())
    }

    /// Recompute the account's lifetime counters from the recipient rows.
    /// Always overwritten from the source of truth, never incremented.
    pub async fn rollup_lifetime_totals(&self, account_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE quota_balances SET \
             total_sent = (SELECT COUNT(*) FROM recipients r JOIN messages m \
                 ON r.message_id = m.id WHERE m.account_id = ? \
                 AND r.state IN ('submitted', 'delivered', 'failed')), \
             total_delivered = (SELECT COUNT(*) FROM recipients r JOIN messages m \
                 ON r.message_id = m.id WHERE m.account_id = ? \
                 AND r.state = 'delivered'), \
             total_failed = (SELECT COUNT(*) FROM recipients r JOIN messages m \
                 ON r.message_id = m.id WHERE m.account_id = ? \
                 AND r.state IN ('failed', 'submit_failed')), \
             updated_at = ? \
             WHERE account_id = ?",
        )
        .bind(account_id)
        .bind(account_id)
        .bind(account_id)
        .bind(to_millis(Utc::now()))
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
