//! Dispatch coordinator.
//!
//! Drives one dispatch end to end: validate, reserve quota, persist the
//! message and its recipients, submit through the gateway, settle the
//! reservation against what the provider actually accepted, then roll up.
//!
//! Ordering is load-bearing: the reservation happens before any record is
//! created, so a quota rejection leaves nothing behind; rows are created
//! before the provider call, so a crash mid-submit leaves auditable
//! `queued` rows rather than silent loss.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use sf_common::{Campaign, CampaignStatus, Message, MessageStatus, Recipient, RecipientState};
use sf_gateway::{PersonalizedEntry, SmsProvider};
use sf_store::{CampaignRepository, MessageRepository, QuotaLedger, RecipientRepository};

use crate::error::{DispatchError, Result};
use crate::rollup::Rollup;

/// What to send: one shared body, or a body per recipient.
#[derive(Debug, Clone)]
pub enum DispatchBody {
    Uniform {
        body: String,
        recipients: Vec<String>,
    },
    Personalized {
        entries: Vec<PersonalizedEntry>,
    },
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub account_id: String,
    /// Reuse an existing campaign; `None` creates a fresh one.
    pub campaign_id: Option<String>,
    /// Title for a freshly created campaign. Defaults to a timestamped one.
    pub campaign_title: Option<String>,
    pub sender_id: String,
    pub body: DispatchBody,
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub campaign_id: String,
    pub message_id: String,
    /// Recipients the provider accepted.
    pub submitted: i64,
    /// Recipients recorded as `submit_failed`: invalid up front, refused
    /// by the provider, or lost to a transport failure.
    pub rejected: i64,
    /// Entries with no usable phone number. They have no recipient row;
    /// this count is the only trace of them.
    pub dropped: i64,
}

/// Request recipients split into what reaches the gateway and what fails
/// locally before any quota is touched.
#[derive(Debug)]
struct Preflight {
    gateway_uniform: Vec<String>,
    gateway_personalized: Vec<PersonalizedEntry>,
    /// (phone, error) pairs recorded as `submit_failed` without consuming
    /// credits.
    local_failures: Vec<(String, String)>,
    /// Entries with no usable phone number; counted as rejected but never
    /// recorded (there is no key to record them under).
    dropped: i64,
    personalized: bool,
    shared_body: Option<String>,
}

impl Preflight {
    fn gateway_count(&self) -> i64 {
        (self.gateway_uniform.len() + self.gateway_personalized.len()) as i64
    }
}

pub struct DispatchCoordinator {
    provider: Arc<dyn SmsProvider>,
    campaigns: CampaignRepository,
    messages: MessageRepository,
    recipients: RecipientRepository,
    quotas: QuotaLedger,
    rollup: Rollup,
}

impl DispatchCoordinator {
    pub fn new(
        provider: Arc<dyn SmsProvider>,
        campaigns: CampaignRepository,
        messages: MessageRepository,
        recipients: RecipientRepository,
        quotas: QuotaLedger,
        rollup: Rollup,
    ) -> Self {
        Self {
            provider,
            campaigns,
            messages,
            recipients,
            quotas,
            rollup,
        }
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReceipt> {
        let preflight = validate(&request.body)?;

        // Reserve before creating anything: a quota rejection must leave
        // no trace. Nothing to reserve when every entry failed locally.
        let n = preflight.gateway_count();
        let reservation = if n > 0 {
            Some(self.quotas.reserve(&request.account_id, n).await?)
        } else {
            None
        };

        let persisted = self.persist_records(&request, &preflight).await;
        let (campaign, message) = match persisted {
            Ok(pair) => pair,
            Err(e) => {
                // Nothing was submitted; hand every credit back.
                if let Some(reservation) = reservation {
                    self.quotas.release(reservation, 0).await?;
                }
                return Err(e);
            }
        };

        let outcome = match &preflight.shared_body {
            Some(body) => {
                self.provider
                    .submit(&request.sender_id, body, &preflight.gateway_uniform)
                    .await
            }
            None => {
                self.provider
                    .submit_personalized(&request.sender_id, &preflight.gateway_personalized)
                    .await
            }
        };

        let now = Utc::now();
        let accepted = outcome.accepted_count();

        // The provider has already taken `accepted` recipients, so the
        // reservation is settled before any later persistence failure can
        // surface; otherwise the unaccepted share would stay debited.
        let recorded = self.record_outcome(&message.id, &preflight, &outcome, now).await;
        if let Some(reservation) = reservation {
            self.quotas.release(reservation, accepted).await?;
        }
        recorded?;

        let status = if accepted > 0 {
            MessageStatus::Submitted
        } else {
            MessageStatus::Failed
        };
        self.messages
            .mark_submitted(&message.id, status, &outcome.raw, now)
            .await?;

        self.rollup.message(&message.id).await?;
        self.rollup.campaign(&campaign.id, &request.account_id).await?;

        let rejected =
            preflight.local_failures.len() as i64 + (outcome.entries.len() as i64 - accepted);

        if accepted == 0 {
            warn!(
                message_id = %message.id,
                rejected,
                dropped = preflight.dropped,
                "Dispatch completed with no accepted recipients"
            );
        } else {
            info!(
                campaign_id = %campaign.id,
                message_id = %message.id,
                submitted = accepted,
                rejected,
                dropped = preflight.dropped,
                "Dispatch completed"
            );
        }

        Ok(DispatchReceipt {
            campaign_id: campaign.id,
            message_id: message.id,
            submitted: accepted,
            rejected,
            dropped: preflight.dropped,
        })
    }

    /// Write the per-recipient submission outcomes through the keyed
    /// upsert.
    async fn record_outcome(
        &self,
        message_id: &str,
        preflight: &Preflight,
        outcome: &sf_gateway::SubmissionOutcome,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        for entry in &outcome.entries {
            let mut recipient = Recipient::queued(message_id, &entry.phone);
            if preflight.personalized {
                if let Some(p) = preflight
                    .gateway_personalized
                    .iter()
                    .find(|p| p.phone == entry.phone)
                {
                    recipient = recipient.with_body(&p.body);
                }
            }
            if entry.accepted {
                recipient.state = RecipientState::Submitted;
                recipient.provider_message_id = entry.provider_message_id.clone();
                recipient.submitted_at = Some(now);
            } else {
                recipient.state = RecipientState::SubmitFailed;
                recipient.error_text = entry.error.clone();
            }
            self.recipients.upsert(&recipient).await?;
        }
        Ok(())
    }

    /// Find or create the campaign, then create the message and its
    /// recipient rows in one transaction.
    async fn persist_records(
        &self,
        request: &DispatchRequest,
        preflight: &Preflight,
    ) -> Result<(Campaign, Message)> {
        let campaign = match &request.campaign_id {
            Some(id) => self
                .campaigns
                .find_for_account(id, &request.account_id)
                .await?
                .ok_or_else(|| DispatchError::CampaignNotFound { id: id.clone() })?,
            None => {
                let title = request
                    .campaign_title
                    .clone()
                    .unwrap_or_else(|| format!("Campaign {}", Utc::now().format("%d-%b %H:%M")));
                let campaign = Campaign::new(&request.account_id, title);
                self.campaigns.insert(&campaign).await?;
                campaign
            }
        };

        if campaign.status == CampaignStatus::Draft {
            self.campaigns
                .set_status(&campaign.id, CampaignStatus::Active)
                .await?;
        }

        let message = Message::new(
            &request.account_id,
            Some(campaign.id.clone()),
            &request.sender_id,
            preflight.shared_body.clone(),
            preflight.personalized,
        );

        let mut rows = Vec::new();
        for phone in &preflight.gateway_uniform {
            rows.push(Recipient::queued(&message.id, phone));
        }
        for entry in &preflight.gateway_personalized {
            rows.push(Recipient::queued(&message.id, &entry.phone).with_body(&entry.body));
        }
        for (phone, error) in &preflight.local_failures {
            let mut recipient = Recipient::queued(&message.id, phone);
            recipient.state = RecipientState::SubmitFailed;
            recipient.error_text = Some(error.clone());
            rows.push(recipient);
        }

        self.messages.create_with_recipients(&message, &rows).await?;
        Ok((campaign, message))
    }
}

fn validate(body: &DispatchBody) -> Result<Preflight> {
    match body {
        DispatchBody::Uniform { body, recipients } => {
            if recipients.is_empty() {
                return Err(DispatchError::EmptyRecipients);
            }

            let mut seen = std::collections::HashSet::new();
            let mut gateway = Vec::new();
            let mut dropped = 0;
            for phone in recipients {
                let phone = phone.trim();
                if phone.is_empty() {
                    dropped += 1;
                } else if seen.insert(phone.to_string()) {
                    gateway.push(phone.to_string());
                }
            }

            if gateway.is_empty() {
                return Err(DispatchError::EmptyRecipients);
            }

            Ok(Preflight {
                gateway_uniform: gateway,
                gateway_personalized: Vec::new(),
                local_failures: Vec::new(),
                dropped,
                personalized: false,
                shared_body: Some(body.clone()),
            })
        }
        DispatchBody::Personalized { entries } => {
            if entries.is_empty() {
                return Err(DispatchError::EmptyRecipients);
            }

            let mut seen = std::collections::HashSet::new();
            let mut gateway = Vec::new();
            let mut local_failures = Vec::new();
            let mut dropped = 0;
            for entry in entries {
                let phone = entry.phone.trim();
                if phone.is_empty() {
                    dropped += 1;
                    continue;
                }
                if !seen.insert(phone.to_string()) {
                    continue;
                }
                if entry.body.trim().is_empty() {
                    local_failures.push((phone.to_string(), "empty message body".to_string()));
                } else {
                    gateway.push(PersonalizedEntry {
                        phone: phone.to_string(),
                        body: entry.body.clone(),
                    });
                }
            }

            if gateway.is_empty() && local_failures.is_empty() {
                return Err(DispatchError::EmptyRecipients);
            }

            Ok(Preflight {
                gateway_uniform: Vec::new(),
                gateway_personalized: gateway,
                local_failures,
                dropped,
                personalized: true,
                shared_body: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_validation_dedupes_and_drops_blanks() {
        let preflight = validate(&DispatchBody::Uniform {
            body: "hello".to_string(),
            recipients: vec![
                "919000000001".to_string(),
                " 919000000001 ".to_string(),
                "".to_string(),
                "919000000002".to_string(),
            ],
        })
        .unwrap();

        assert_eq!(preflight.gateway_uniform.len(), 2);
        assert_eq!(preflight.dropped, 1);
        assert_eq!(preflight.gateway_count(), 2);
    }

    #[test]
    fn empty_list_is_rejected_before_anything_else() {
        let err = validate(&DispatchBody::Uniform {
            body: "hello".to_string(),
            recipients: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyRecipients));

        let err = validate(&DispatchBody::Uniform {
            body: "hello".to_string(),
            recipients: vec!["  ".to_string()],
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyRecipients));
    }

    #[test]
    fn personalized_splits_empty_bodies_into_local_failures() {
        let preflight = validate(&DispatchBody::Personalized {
            entries: vec![
                PersonalizedEntry {
                    phone: "919000000001".to_string(),
                    body: "Hi Asha".to_string(),
                },
                PersonalizedEntry {
                    phone: "919000000002".to_string(),
                    body: "".to_string(),
                },
                PersonalizedEntry {
                    phone: "".to_string(),
                    body: "orphan body".to_string(),
                },
            ],
        })
        .unwrap();

        assert_eq!(preflight.gateway_personalized.len(), 1);
        assert_eq!(preflight.local_failures.len(), 1);
        assert_eq!(preflight.local_failures[0].1, "empty message body");
        assert_eq!(preflight.dropped, 1);
        // Only gateway-bound entries count against quota
        assert_eq!(preflight.gateway_count(), 1);
    }
}
