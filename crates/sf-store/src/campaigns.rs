//! Campaign repository.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use sf_common::{Campaign, CampaignStatus};

use crate::{from_millis, to_millis, Result, StoreError};

#[derive(Clone)]
pub struct CampaignRepository {
    pool: SqlitePool,
}

impl CampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                total_sent INTEGER NOT NULL DEFAULT 0,
                total_delivered INTEGER NOT NULL DEFAULT 0,
                total_failed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_campaigns_account ON campaigns (account_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            "INSERT INTO campaigns (id, account_id, title, status, total_recipients, \
             total_sent, total_delivered, total_failed, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.account_id)
        .bind(&campaign.title)
        .bind(campaign.status.as_str())
        .bind(campaign.total_recipients)
        .bind(campaign.total_sent)
        .bind(campaign.total_delivered)
        .bind(campaign.total_failed)
        .bind(to_millis(campaign.created_at))
        .bind(to_millis(campaign.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(campaign_id = %campaign.id, "Created campaign");
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_row).transpose()
    }

    /// Scoped lookup: a campaign belongs to the account that created it.
    pub async fn find_for_account(&self, id: &str, account_id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_row).transpose()
    }

    pub async fn set_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(to_millis(chrono::Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite aggregate counters and status with freshly recomputed
    /// values. Counters are never incremented relative to their prior value.
    pub async fn update_rollup(
        &self,
        id: &str,
        total_recipients: i64,
        total_sent: i64,
        total_delivered: i64,
        total_failed: i64,
        status: CampaignStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET total_recipients = ?, total_sent = ?, \
             total_delivered = ?, total_failed = ?, status = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(total_recipients)
        .bind(total_sent)
        .bind(total_delivered)
        .bind(total_failed)
        .bind(status.as_str())
        .bind(to_millis(chrono::Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(campaign_id = %id, status = %status, "Rolled up campaign counters");
        Ok(())
    }
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    let status_text: String = row.get("status");
    let status = CampaignStatus::parse(&status_text).ok_or(StoreError::InvalidColumn {
        column: "status",
        value: status_text,
    })?;

    Ok(Campaign {
        id: row.get("id"),
        account_id: row.get("account_id"),
        title: row.get("title"),
        status,
        total_recipients: row.get("total_recipients"),
        total_sent: row.get("total_sent"),
        total_delivered: row.get("total_delivered"),
        total_failed: row.get("total_failed"),
        created_at: from_millis(row.get("created_at"), "created_at")?,
        updated_at: from_millis(row.get("updated_at"), "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_pool;

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let repo = CampaignRepository::new(memory_pool().await);
        repo.init_schema().await.unwrap();

        let campaign = Campaign::new("acct-1", "March reminders");
        repo.insert(&campaign).await.unwrap();

        let found = repo.find_by_id(&campaign.id).await.unwrap().unwrap();
        assert_eq!(found.title, "March reminders");
        assert_eq!(found.status, CampaignStatus::Draft);

        // Wrong account sees nothing
        let missing = repo.find_for_account(&campaign.id, "acct-2").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn rollup_overwrites_counters() {
        let repo = CampaignRepository::new(memory_pool().await);
        repo.init_schema().await.unwrap();

        let campaign = Campaign::new("acct-1", "t");
        repo.insert(&campaign).await.unwrap();

        repo.update_rollup(&campaign.id, 10, 8, 6, 2, CampaignStatus::Active)
            .await
            .unwrap();
        repo.update_rollup(&campaign.id, 10, 8, 7, 1, CampaignStatus::Partial)
            .await
            .unwrap();

        let found = repo.find_by_id(&campaign.id).await.unwrap().unwrap();
        assert_eq!(found.total_delivered, 7);
        assert_eq!(found.total_failed, 1);
        assert_eq!(found.status, CampaignStatus::Partial);
    }
}
