//! Rollup aggregator.
//!
//! Aggregate counters on messages and campaigns are always recomputed from
//! the rows beneath them and overwritten whole. Incremental adjustment
//! drifts under retries and partial failures; recompute-from-source cannot.

use sf_common::{CampaignStatus, MessageStatus};
use sf_store::{
    CampaignRepository, CampaignTotals, MessageRepository, QuotaLedger, RecipientCounts,
    RecipientRepository,
};

use crate::error::{DispatchError, Result};

/// Derive a message's lifecycle status from its recipient counts.
///
/// While any recipient is non-terminal the message stays open: `pending`
/// if it was never handed to the provider, `submitted` otherwise. Once all
/// recipients are terminal the mix decides `sent`, `partial`, or `failed`.
pub fn derive_message_status(current: MessageStatus, counts: &RecipientCounts) -> MessageStatus {
    if counts.non_terminal() > 0 {
        if current == MessageStatus::Pending {
            MessageStatus::Pending
        } else {
            MessageStatus::Submitted
        }
    } else if counts.delivered > 0 && counts.failed_total() > 0 {
        MessageStatus::Partial
    } else if counts.delivered > 0 {
        MessageStatus::Sent
    } else {
        MessageStatus::Failed
    }
}

/// Derive a campaign's status from its message totals.
pub fn derive_campaign_status(totals: &CampaignTotals) -> CampaignStatus {
    if totals.message_count == 0 {
        CampaignStatus::Draft
    } else if totals.open_messages > 0 {
        CampaignStatus::Active
    } else if totals.sent_messages == totals.message_count {
        CampaignStatus::Completed
    } else if totals.failed_messages == totals.message_count {
        CampaignStatus::Failed
    } else {
        CampaignStatus::Partial
    }
}

#[derive(Clone)]
pub struct Rollup {
    messages: MessageRepository,
    campaigns: CampaignRepository,
    recipients: RecipientRepository,
    quotas: QuotaLedger,
}

impl Rollup {
    pub fn new(
        messages: MessageRepository,
        campaigns: CampaignRepository,
        recipients: RecipientRepository,
        quotas: QuotaLedger,
    ) -> Self {
        Self {
            messages,
            campaigns,
            recipients,
            quotas,
        }
    }

    /// Recount one message's recipients and overwrite its counters and
    /// status. Returns the derived status.
    pub async fn message(&self, message_id: &str) -> Result<MessageStatus> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DispatchError::MessageNotFound {
                id: message_id.to_string(),
            })?;

        let counts = self.recipients.counts(message_id).await?;
        let status = derive_message_status(message.status, &counts);

        self.messages
            .update_rollup(
                message_id,
                counts.total(),
                counts.delivered,
                counts.failed_total(),
                status,
            )
            .await?;
        Ok(status)
    }

    /// Re-sum one campaign's message counters, overwrite its aggregates,
    /// and refresh the owning account's lifetime totals.
    pub async fn campaign(&self, campaign_id: &str, account_id: &str) -> Result<CampaignStatus> {
        let totals = self.messages.campaign_totals(campaign_id).await?;
        let accepted = self
            .recipients
            .accepted_count_for_campaign(campaign_id)
            .await?;
        let status = derive_campaign_status(&totals);

        self.campaigns
            .update_rollup(
                campaign_id,
                totals.total_recipients,
                accepted,
                totals.total_delivered,
                totals.total_failed,
                status,
            )
            .await?;

        self.quotas.rollup_lifetime_totals(account_id).await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(
        queued: i64,
        submitted: i64,
        submit_failed: i64,
        delivered: i64,
        failed: i64,
    ) -> RecipientCounts {
        RecipientCounts {
            queued,
            submitted,
            submit_failed,
            delivered,
            failed,
        }
    }

    #[test]
    fn message_stays_open_while_recipients_are_non_terminal() {
        assert_eq!(
            derive_message_status(MessageStatus::Pending, &counts(3, 0, 0, 0, 0)),
            MessageStatus::Pending
        );
        assert_eq!(
            derive_message_status(MessageStatus::Submitted, &counts(0, 2, 1, 0, 0)),
            MessageStatus::Submitted
        );
    }

    #[test]
    fn terminal_mix_decides_sent_partial_failed() {
        assert_eq!(
            derive_message_status(MessageStatus::Submitted, &counts(0, 0, 0, 3, 0)),
            MessageStatus::Sent
        );
        assert_eq!(
            derive_message_status(MessageStatus::Submitted, &counts(0, 0, 1, 2, 1)),
            MessageStatus::Partial
        );
        assert_eq!(
            derive_message_status(MessageStatus::Submitted, &counts(0, 0, 2, 0, 1)),
            MessageStatus::Failed
        );
    }

    #[test]
    fn submit_failed_counts_as_failure() {
        // All rejected at submission, none delivered
        assert_eq!(
            derive_message_status(MessageStatus::Failed, &counts(0, 0, 3, 0, 0)),
            MessageStatus::Failed
        );
    }

    #[test]
    fn campaign_status_follows_message_mix() {
        let mut totals = CampaignTotals {
            message_count: 2,
            open_messages: 1,
            sent_messages: 1,
            partial_messages: 0,
            failed_messages: 0,
            total_recipients: 5,
            total_delivered: 3,
            total_failed: 0,
        };
        assert_eq!(derive_campaign_status(&totals), CampaignStatus::Active);

        totals.open_messages = 0;
        totals.sent_messages = 2;
        assert_eq!(derive_campaign_status(&totals), CampaignStatus::Completed);

        totals.sent_messages = 1;
        totals.failed_messages = 1;
        assert_eq!(derive_campaign_status(&totals), CampaignStatus::Partial);

        totals.sent_messages = 0;
        totals.failed_messages = 2;
        assert_eq!(derive_campaign_status(&totals), CampaignStatus::Failed);
    }

    #[test]
    fn empty_campaign_stays_draft() {
        let totals = CampaignTotals {
            message_count: 0,
            open_messages: 0,
            sent_messages: 0,
            partial_messages: 0,
            failed_messages: 0,
            total_recipients: 0,
            total_delivered: 0,
            total_failed: 0,
        };
        assert_eq!(derive_campaign_status(&totals), CampaignStatus::Draft);
    }
}
