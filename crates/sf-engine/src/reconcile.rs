//! Reconciliation engine.
//!
//! Polls the provider for every recipient still awaiting a delivery
//! confirmation, applies the outcome through the keyed upsert, and rolls
//! the message and campaign up afterwards. Running it twice over the same
//! data is a no-op beyond timestamps.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use sf_common::{Recipient, RecipientState};
use sf_gateway::{DeliveryBucket, SmsProvider, StatusOutcome};
use sf_store::{MessageRepository, RecipientRepository};

use crate::error::{DispatchError, Result};
use crate::rollup::Rollup;

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Concurrent status calls per message. Sensible range is 5-20.
    pub concurrency: usize,
    /// How long a recipient may sit in `submitted` before it is written
    /// off as failed.
    pub stale_after: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            stale_after: Duration::hours(72),
        }
    }
}

/// A status call that could not be completed this pass. The recipient
/// stays as it was and will be retried on the next sweep.
#[derive(Debug, Clone)]
pub struct RecipientError {
    pub phone: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub delivered: i64,
    pub failed: i64,
    pub pending: i64,
    pub errors: Vec<RecipientError>,
}

pub struct Reconciler {
    provider: Arc<dyn SmsProvider>,
    messages: MessageRepository,
    recipients: RecipientRepository,
    rollup: Rollup,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn SmsProvider>,
        messages: MessageRepository,
        recipients: RecipientRepository,
        rollup: Rollup,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            provider,
            messages,
            recipients,
            rollup,
            settings,
        }
    }

    pub async fn reconcile(&self, message_id: &str) -> Result<ReconcileReport> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DispatchError::MessageNotFound {
                id: message_id.to_string(),
            })?;

        let awaiting = self.recipients.find_awaiting_status(message_id).await?;
        if awaiting.is_empty() {
            debug!(message_id = %message_id, "Nothing awaiting status");
            return Ok(ReconcileReport::default());
        }

        let provider = &self.provider;
        let polls: Vec<_> = stream::iter(awaiting.into_iter().map(|recipient| async move {
            // find_awaiting_status only returns rows with a provider id
            let id = recipient.provider_message_id.clone().unwrap_or_default();
            let result = provider.check_status(&id).await;
            (recipient, result)
        }))
        .buffer_unordered(self.settings.concurrency)
        .collect()
        .await;

        let now = Utc::now();
        let mut report = ReconcileReport::default();

        for (recipient, result) in polls {
            match result {
                Ok(status) => {
                    self.apply_status(recipient, status, &mut report).await?;
                }
                Err(e) => {
                    // One failed call never fails the pass; the stale
                    // policy still applies so a dead provider id cannot
                    // pin a recipient open forever.
                    warn!(
                        message_id = %message_id,
                        phone = %recipient.phone_number,
                        error = %e,
                        "Status call failed"
                    );
                    report.errors.push(RecipientError {
                        phone: recipient.phone_number.clone(),
                        error: e.to_string(),
                    });
                    if self.is_stale(&recipient) {
                        self.write_off_stale(recipient, &mut report).await?;
                    }
                }
            }
        }

        self.rollup.message(message_id).await?;
        if let Some(campaign_id) = &message.campaign_id {
            self.rollup.campaign(campaign_id, &message.account_id).await?;
        }

        info!(
            message_id = %message_id,
            delivered = report.delivered,
            failed = report.failed,
            pending = report.pending,
            errors = report.errors.len(),
            "Reconciled message"
        );
        Ok(report)
    }

    async fn apply_status(
        &self,
        mut recipient: Recipient,
        status: StatusOutcome,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        recipient.status_token = Some(status.raw_token.clone());
        if recipient.submitted_at.is_none() {
            recipient.submitted_at = status.submit_time;
        }

        match status.bucket {
            DeliveryBucket::Delivered => {
                recipient.state = RecipientState::Delivered;
                recipient.done_at = status.done_time.or_else(|| Some(Utc::now()));
                recipient.error_text = None;
                self.recipients.upsert(&recipient).await?;
                report.delivered += 1;
            }
            DeliveryBucket::Failed => {
                recipient.state = RecipientState::Failed;
                recipient.done_at = status.done_time.or_else(|| Some(Utc::now()));
                recipient.error_text = Some(status.raw_token);
                self.recipients.upsert(&recipient).await?;
                report.failed += 1;
            }
            DeliveryBucket::Pending => {
                if self.is_stale(&recipient) {
                    self.write_off_stale(recipient, report).await?;
                } else {
                    // State unchanged; only the diagnostic token refreshes.
                    self.recipients.upsert(&recipient).await?;
                    report.pending += 1;
                }
            }
        }
        Ok(())
    }

    fn is_stale(&self, recipient: &Recipient) -> bool {
        let since = recipient.submitted_at.unwrap_or(recipient.created_at);
        Utc::now() - since > self.settings.stale_after
    }

    async fn write_off_stale(
        &self,
        mut recipient: Recipient,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        warn!(
            message_id = %recipient.message_id,
            phone = %recipient.phone_number,
            "Writing off stale recipient"
        );
        recipient.state = RecipientState::Failed;
        recipient.error_text = Some(format!(
            "delivery unconfirmed after {}h",
            self.settings.stale_after.num_hours()
        ));
        recipient.done_at = Some(Utc::now());
        self.recipients.upsert(&recipient).await?;
        report.failed += 1;
        Ok(())
    }
}
