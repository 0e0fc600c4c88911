//! Recipient repository.
//!
//! All writes after creation go through `upsert`, keyed by
//! (message_id, phone_number). Re-applying the same outcome is a no-op
//! beyond the updated_at refresh.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use sf_common::{Recipient, RecipientState};

use crate::{from_millis, opt_from_millis, opt_to_millis, to_millis, Result, StoreError};

/// Recipient counts per state for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecipientCounts {
    pub queued: i64,
    pub submitted: i64,
    pub submit_failed: i64,
    pub delivered: i64,
    pub failed: i64,
}

impl RecipientCounts {
    pub fn total(&self) -> i64 {
        self.queued + self.submitted + self.submit_failed + self.delivered + self.failed
    }

    /// Recipients still awaiting a terminal outcome.
    pub fn non_terminal(&self) -> i64 {
        self.queued + self.submitted
    }

    /// Failures of either kind: rejected at submission or failed delivery.
    pub fn failed_total(&self) -> i64 {
        self.failed + self.submit_failed
    }
}

#[derive(Clone)]
pub struct RecipientRepository {
    pool: SqlitePool,
}

impl RecipientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS recipients (
                message_id TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                body TEXT,
                provider_message_id TEXT,
                state TEXT NOT NULL,
                error_text TEXT,
                status_token TEXT,
                submitted_at INTEGER,
                done_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (message_id, phone_number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_recipients_state ON recipients (message_id, state)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Idempotent write keyed by (message_id, phone_number). A re-submission
    /// for the same pair updates the existing row rather than duplicating it.
    pub async fn upsert(&self, recipient: &Recipient) -> Result<()> {
        sqlx::query(
            "INSERT INTO recipients (message_id, phone_number, body, provider_message_id, \
             state, error_text, status_token, submitted_at, done_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (message_id, phone_number) DO UPDATE SET \
                body = excluded.body, \
                provider_message_id = excluded.provider_message_id, \
                state = excluded.state, \
                error_text = excluded.error_text, \
                status_token = excluded.status_token, \
                submitted_at = excluded.submitted_at, \
                done_at = excluded.done_at, \
                updated_at = excluded.updated_at",
        )
        .bind(&recipient.message_id)
        .bind(&recipient.phone_number)
        .bind(&recipient.body)
        .bind(&recipient.provider_message_id)
        .bind(recipient.state.as_str())
        .bind(&recipient.error_text)
        .bind(&recipient.status_token)
        .bind(opt_to_millis(recipient.submitted_at))
        .bind(opt_to_millis(recipient.done_at))
        .bind(to_millis(recipient.created_at))
        .bind(to_millis(chrono::Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!(
            message_id = %recipient.message_id,
            phone = %recipient.phone_number,
            state = %recipient.state,
            "Upserted recipient"
        );
        Ok(())
    }

    pub async fn find_by_message(&self, message_id: &str) -> Result<Vec<Recipient>> {
        let rows = sqlx::query(
            "SELECT * FROM recipients WHERE message_id = ? ORDER BY phone_number ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_row).collect()
    }

    /// Recipients eligible for a reconciliation poll: submitted with a
    /// provider-assigned id.
    pub async fn find_awaiting_status(&self, message_id: &str) -> Result<Vec<Recipient>> {
        let rows = sqlx::query(
            "SELECT * FROM recipients WHERE message_id = ? AND state = 'submitted' \
             AND provider_message_id IS NOT NULL ORDER BY phone_number ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_row).collect()
    }

    /// Count recipients per state in one pass.
    pub async fn counts(&self, message_id: &str) -> Result<RecipientCounts> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS n FROM recipients WHERE message_id = ? GROUP BY state",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = RecipientCounts::default();
        for row in rows {
            let state_text: String = row.get("state");
            let n: i64 = row.get("n");
            match RecipientState::parse(&state_text) {
                Some(RecipientState::Queued) => counts.queued = n,
                Some(RecipientState::Submitted) => counts.submitted = n,
                Some(RecipientState::SubmitFailed) => counts.submit_failed = n,
                Some(RecipientState::Delivered) => counts.delivered = n,
                Some(RecipientState::Failed) => counts.failed = n,
                None => {
                    return Err(StoreError::InvalidColumn {
                        column: "state",
                        value: state_text,
                    })
                }
            }
        }
        Ok(counts)
    }

    /// Count of a campaign's recipients the provider accepted at submission
    /// time. Used for the campaign-level `total_sent` rollup.
    pub async fn accepted_count_for_campaign(&self, campaign_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM recipients r \
             JOIN messages m ON r.message_id = m.id \
             WHERE m.campaign_id = ? AND r.state IN ('submitted', 'delivered', 'failed')",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Recipient> {
    let state_text: String = row.get("state");
    let state = RecipientState::parse(&state_text).ok_or(StoreError::InvalidColumn {
        column: "state",
        value: state_text,
    })?;

    Ok(Recipient {
        message_id: row.get("message_id"),
        phone_number: row.get("phone_number"),
        body: row.get("body"),
        provider_message_id: row.get("provider_message_id"),
        state,
        error_text: row.get("error_text"),
        status_token: row.get("status_token"),
        submitted_at: opt_from_millis(row.get("submitted_at"), "submitted_at")?,
        done_at: opt_from_millis(row.get("done_at"), "done_at")?,
        created_at: from_millis(row.get("created_at"), "created_at")?,
        updated_at: from_millis(row.get("updated_at"), "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_pool;

    async fn repo() -> RecipientRepository {
        let repo = RecipientRepository::new(memory_pool().await);
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn upsert_updates_instead_of_duplicating() {
        let repo = repo().await;

        let mut recipient = Recipient::queued("msg-1", "919000000001");
        repo.upsert(&recipient).await.unwrap();

        recipient.state = RecipientState::Submitted;
        recipient.provider_message_id = Some("MID-9".into());
        repo.upsert(&recipient).await.unwrap();

        let stored = repo.find_by_message("msg-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].state, RecipientState::Submitted);
        assert_eq!(stored[0].provider_message_id.as_deref(), Some("MID-9"));
    }

    #[tokio::test]
    async fn reapplying_same_outcome_is_stable() {
        let repo = repo().await;

        let mut recipient = Recipient::queued("msg-1", "919000000001");
        recipient.state = RecipientState::Delivered;
        repo.upsert(&recipient).await.unwrap();
        let first = repo.find_by_message("msg-1").await.unwrap().remove(0);

        repo.upsert(&recipient).await.unwrap();
        let second = repo.find_by_message("msg-1").await.unwrap().remove(0);

        assert_eq!(first.state, second.state);
        assert_eq!(first.error_text, second.error_text);
        assert_eq!(first.done_at, second.done_at);
    }

    #[tokio::test]
    async fn counts_group_by_state() {
        let repo = repo().await;

        for (phone, state) in [
            ("919000000001", RecipientState::Delivered),
            ("919000000002", RecipientState::Delivered),
            ("919000000003", RecipientState::Failed),
            ("919000000004", RecipientState::SubmitFailed),
            ("919000000005", RecipientState::Submitted),
        ] {
            let mut recipient = Recipient::queued("msg-1", phone);
            recipient.state = state;
            repo.upsert(&recipient).await.unwrap();
        }

        let counts = repo.counts("msg-1").await.unwrap();
        assert_eq!(counts.delivered, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.submit_failed, 1);
        assert_eq!(counts.submitted, 1);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.failed_total(), 2);
        assert_eq!(counts.non_terminal(), 1);
    }

    #[tokio::test]
    async fn awaiting_status_requires_provider_id() {
        let repo = repo().await;

        let mut with_id = Recipient::queued("msg-1", "919000000001");
        with_id.state = RecipientState::Submitted;
        with_id.provider_message_id = Some("MID-1".into());
        repo.upsert(&with_id).await.unwrap();

        let mut without_id = Recipient::queued("msg-1", "919000000002");
        without_id.state = RecipientState::Submitted;
        repo.upsert(&without_id).await.unwrap();

        let awaiting = repo.find_awaiting_status("msg-1").await.unwrap();
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].phone_number, "919000000001");
    }
}
