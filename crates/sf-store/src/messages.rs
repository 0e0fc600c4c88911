//! Message repository.
//!
//! A message and its recipient set are created in one transaction so a
//! crash can never leave an orphaned message behind.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use chrono::{DateTime, Utc};
use sf_common::{Message, MessageStatus, Recipient};

use crate::{from_millis, opt_from_millis, opt_to_millis, to_millis, Result, StoreError};

/// Aggregates over a campaign's messages, straight from the rows.
#[derive(Debug, Clone, Default)]
pub struct CampaignTotals {
    pub message_count: i64,
    pub open_messages: i64,
    pub sent_messages: i64,
    pub partial_messages: i64,
    pub failed_messages: i64,
    pub total_recipients: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
}

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                campaign_id TEXT,
                account_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                body TEXT,
                personalized INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                successful_deliveries INTEGER NOT NULL DEFAULT 0,
                failed_deliveries INTEGER NOT NULL DEFAULT 0,
                provider_response TEXT,
                submitted_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_campaign ON messages (campaign_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_account ON messages (account_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create the message row and all of its recipient rows atomically.
    pub async fn create_with_recipients(
        &self,
        message: &Message,
        recipients: &[Recipient],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let provider_response = message
            .provider_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO messages (id, campaign_id, account_id, sender_id, body, \
             personalized, status, total_recipients, successful_deliveries, \
             failed_deliveries, provider_response, submitted_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.campaign_id)
        .bind(&message.account_id)
        .bind(&message.sender_id)
        .bind(&message.body)
        .bind(message.personalized)
        .bind(message.status.as_str())
        .bind(message.total_recipients)
        .bind(message.successful_deliveries)
        .bind(message.failed_deliveries)
        .bind(provider_response)
        .bind(opt_to_millis(message.submitted_at))
        .bind(to_millis(message.created_at))
        .bind(to_millis(message.updated_at))
        .execute(&mut *tx)
        .await?;

        for recipient in recipients {
            sqlx::query(
                "INSERT INTO recipients (message_id, phone_number, body, \
                 provider_message_id, state, error_text, status_token, submitted_at, \
                 done_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
            .bind(to_millis(recipient.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(message_id = %message.id, recipients = recipients.len(), "Created message");
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_row).transpose()
    }

    /// Record the submission result: lifecycle status, the opaque provider
    /// response snapshot, and the submit time.
    pub async fn mark_submitted(
        &self,
        id: &str,
        status: MessageStatus,
        provider_response: &serde_json::Value,
        submitted_at: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = serde_json::to_string(provider_response)?;
        sqlx::query(
            "UPDATE messages SET status = ?, provider_response = ?, submitted_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(snapshot)
        .bind(to_millis(submitted_at))
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite counters and status with recomputed values.
    pub async fn update_rollup(
        &self,
        id: &str,
        total_recipients: i64,
        successful_deliveries: i64,
        failed_deliveries: i64,
        status: MessageStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET total_recipients = ?, successful_deliveries = ?, \
             failed_deliveries = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(total_recipients)
        .bind(successful_deliveries)
        .bind(failed_deliveries)
        .bind(status.as_str())
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(message_id = %id, status = %status, "Rolled up message counters");
        Ok(())
    }

    /// Sum campaign aggregates from the message rows.
    pub async fn campaign_totals(&self, campaign_id: &str) -> Result<CampaignTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS message_count, \
             COALESCE(SUM(CASE WHEN status IN ('pending', 'submitted') THEN 1 ELSE 0 END), 0) AS open_messages, \
             COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0) AS sent_messages, \
             COALESCE(SUM(CASE WHEN status = 'partial' THEN 1 ELSE 0 END), 0) AS partial_messages, \
             COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_messages, \
             COALESCE(SUM(total_recipients), 0) AS total_recipients, \
             COALESCE(SUM(successful_deliveries), 0) AS total_delivered, \
             COALESCE(SUM(failed_deliveries), 0) AS total_failed \
             FROM messages WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignTotals {
            message_count: row.get("message_count"),
            open_messages: row.get("open_messages"),
            sent_messages: row.get("sent_messages"),
            partial_messages: row.get("partial_messages"),
            failed_messages: row.get("failed_messages"),
            total_recipients: row.get("total_recipients"),
            total_delivered: row.get("total_delivered"),
            total_failed: row.get("total_failed"),
        })
    }

    /// Messages that still have recipients awaiting a delivery confirmation.
    /// Fed to the reconciliation sweep.
    pub async fn find_unresolved(&self, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT DISTINCT m.* FROM messages m \
             JOIN recipients r ON r.message_id = m.id \
             WHERE r.state = 'submitted' AND r.provider_message_id IS NOT NULL \
             ORDER BY m.created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_row).collect()
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let status_text: String = row.get("status");
    let status = MessageStatus::parse(&status_text).ok_or(StoreError::InvalidColumn {
        column: "status",
        value: status_text,
    })?;

    let provider_response: Option<String> = row.get("provider_response");
    let provider_response = provider_response
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(Message {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        account_id: row.get("account_id"),
        sender_id: row.get("sender_id"),
        body: row.get("body"),
        personalized: row.get("personalized"),
        status,
        total_recipients: row.get("total_recipients"),
        successful_deliveries: row.get("successful_deliveries"),
        failed_deliveries: row.get("failed_deliveries"),
        provider_response,
        submitted_at: opt_from_millis(row.get("submitted_at"), "submitted_at")?,
        created_at: from_millis(row.get("created_at"), "created_at")?,
        updated_at: from_millis(row.get("updated_at"), "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipients::RecipientRepository;
    use crate::testutil::memory_pool;
    use sf_common::RecipientState;

    async fn setup() -> (MessageRepository, RecipientRepository) {
        let pool = memory_pool().await;
        let messages = MessageRepository::new(pool.clone());
        let recipients = RecipientRepository::new(pool);
        recipients.init_schema().await.unwrap();
        messages.init_schema().await.unwrap();
        (messages, recipients)
    }

    #[tokio::test]
    async fn creates_message_with_recipients_atomically() {
        let (messages, recipients) = setup().await;

        let mut message = Message::new("acct-1", None, "SENDER", Some("hi".into()), false);
        message.total_recipients = 2;
        let rows = vec![
            Recipient::queued(&message.id, "919000000001"),
            Recipient::queued(&message.id, "919000000002"),
        ];
        messages.create_with_recipients(&message, &rows).await.unwrap();

        let found = messages.find_by_id(&message.id).await.unwrap().unwrap();
        assert_eq!(found.total_recipients, 2);
        assert_eq!(found.status, MessageStatus::Pending);

        let stored = recipients.find_by_message(&message.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|r| r.state == RecipientState::Queued));
    }

    #[tokio::test]
    async fn campaign_totals_sum_message_counters() {
        let (messages, _recipients) = setup().await;

        for (delivered, failed, status) in [
            (3, 0, MessageStatus::Sent),
            (1, 2, MessageStatus::Partial),
        ] {
            let mut message =
                Message::new("acct-1", Some("camp-1".into()), "S", Some("b".into()), false);
            message.total_recipients = delivered + failed;
            message.successful_deliveries = delivered;
            message.failed_deliveries = failed;
            message.status = status;
            messages.create_with_recipients(&message, &[]).await.unwrap();
        }

        let totals = messages.campaign_totals("camp-1").await.unwrap();
        assert_eq!(totals.message_count, 2);
        assert_eq!(totals.total_recipients, 6);
        assert_eq!(totals.total_delivered, 4);
        assert_eq!(totals.total_failed, 2);
        assert_eq!(totals.open_messages, 0);
        assert_eq!(totals.partial_messages, 1);
    }

    #[tokio::test]
    async fn unresolved_lists_messages_with_submitted_recipients() {
        let (messages, recipients) = setup().await;

        let message = Message::new("acct-1", None, "S", Some("b".into()), false);
        let mut recipient = Recipient::queued(&message.id, "919000000001");
        recipient.state = RecipientState::Submitted;
        recipient.provider_message_id = Some("MID-1".into());
        messages
            .create_with_recipients(&message, &[recipient])
            .await
            .unwrap();

        let unresolved = messages.find_unresolved(10).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, message.id);

        // Resolve it; the sweep no longer sees the message
        let mut done = recipients.find_by_message(&message.id).await.unwrap().remove(0);
        done.state = RecipientState::Delivered;
        recipients.upsert(&done).await.unwrap();
        assert!(messages.find_unresolved(10).await.unwrap().is_empty());
    }
}
