use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a new entity identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Lifecycle state machines
// ============================================================================

/// Per-recipient delivery state.
///
/// `queued -> submitted -> {delivered | failed}`, or `queued -> submit_failed`
/// when the provider (or local validation) rejects the entry at submission
/// time. `submitted` is the only state a reconciliation poll can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Queued,
    Submitted,
    SubmitFailed,
    Delivered,
    Failed,
}

impl RecipientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientState::Queued => "queued",
            RecipientState::Submitted => "submitted",
            RecipientState::SubmitFailed => "submit_failed",
            RecipientState::Delivered => "delivered",
            RecipientState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RecipientState::Queued),
            "submitted" => Some(RecipientState::Submitted),
            "submit_failed" => Some(RecipientState::SubmitFailed),
            "delivered" => Some(RecipientState::Delivered),
            "failed" => Some(RecipientState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecipientState::SubmitFailed | RecipientState::Delivered | RecipientState::Failed
        )
    }

    /// The provider accepted this recipient at submission time.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            RecipientState::Submitted | RecipientState::Delivered | RecipientState::Failed
        )
    }
}

impl Default for RecipientState {
    fn default() -> Self {
        RecipientState::Queued
    }
}

impl std::fmt::Display for RecipientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message lifecycle status.
///
/// `pending -> submitted -> {sent | partial | failed}` once every recipient
/// reaches a terminal state, or `pending -> failed` when the whole submission
/// is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Submitted,
    Sent,
    Partial,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Submitted => "submitted",
            MessageStatus::Sent => "sent",
            MessageStatus::Partial => "partial",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "submitted" => Some(MessageStatus::Submitted),
            "sent" => Some(MessageStatus::Sent),
            "partial" => Some(MessageStatus::Partial),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent | MessageStatus::Partial | MessageStatus::Failed
        )
    }
}

impl Default for MessageStatus {
    fn default() -> Self {
        MessageStatus::Pending
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign lifecycle status, recomputed by rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Completed,
    Partial,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Partial => "partial",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "active" => Some(CampaignStatus::Active),
            "completed" => Some(CampaignStatus::Completed),
            "partial" => Some(CampaignStatus::Partial),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Partial | CampaignStatus::Failed
        )
    }
}

impl Default for CampaignStatus {
    fn default() -> Self {
        CampaignStatus::Draft
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A named batch of message dispatches belonging to one account.
///
/// Aggregate counters are recomputed from child messages by rollup, never
/// incremented in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub status: CampaignStatus,
    pub total_recipients: i64,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(account_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            account_id: account_id.into(),
            title: title.into(),
            status: CampaignStatus::Draft,
            total_recipients: 0,
            total_sent: 0,
            total_delivered: 0,
            total_failed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One dispatch request: a single body (or a personalized per-recipient body
/// set) sent to a recipient list under a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub campaign_id: Option<String>,
    pub account_id: String,
    pub sender_id: String,
    /// None when each recipient carries its own body.
    pub body: Option<String>,
    pub personalized: bool,
    pub status: MessageStatus,
    pub total_recipients: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    /// Raw provider response, stored for audit. Never parsed again after
    /// initial processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<serde_json::Value>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        account_id: impl Into<String>,
        campaign_id: Option<String>,
        sender_id: impl Into<String>,
        body: Option<String>,
        personalized: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            campaign_id,
            account_id: account_id.into(),
            sender_id: sender_id.into(),
            body,
            personalized,
            status: MessageStatus::Pending,
            total_recipients: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            provider_response: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The unit of delivery tracking: one phone number under one message.
///
/// Uniqueness on (message_id, phone_number) is load-bearing: every write
/// after creation is an idempotent upsert keyed by that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub message_id: String,
    pub phone_number: String,
    /// Per-recipient body for personalized dispatches.
    pub body: Option<String>,
    /// Assigned by the provider once the entry is accepted.
    pub provider_message_id: Option<String>,
    pub state: RecipientState,
    pub error_text: Option<String>,
    /// Last raw provider status token, kept as diagnostic text.
    pub status_token: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    pub fn queued(message_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            phone_number: phone_number.into(),
            body: None,
            provider_message_id: None,
            state: RecipientState::Queued,
            error_text: None,
            status_token: None,
            submitted_at: None,
            done_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Per-account credit balance and lifetime counters.
///
/// `remaining_credits` is mutated only through the quota ledger's atomic
/// reserve/release pair; lifetime totals are recomputed by rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaBalance {
    pub account_id: String,
    pub remaining_credits: i64,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_state_round_trips_through_text() {
        for state in [
            RecipientState::Queued,
            RecipientState::Submitted,
            RecipientState::SubmitFailed,
            RecipientState::Delivered,
            RecipientState::Failed,
        ] {
            assert_eq!(RecipientState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RecipientState::parse("bogus"), None);
    }

    #[test]
    fn recipient_terminal_states() {
        assert!(RecipientState::Delivered.is_terminal());
        assert!(RecipientState::Failed.is_terminal());
        assert!(RecipientState::SubmitFailed.is_terminal());
        assert!(!RecipientState::Submitted.is_terminal());
        assert!(!RecipientState::Queued.is_terminal());
    }

    #[test]
    fn accepted_excludes_submit_failed() {
        assert!(RecipientState::Submitted.is_accepted());
        assert!(RecipientState::Delivered.is_accepted());
        assert!(RecipientState::Failed.is_accepted());
        assert!(!RecipientState::SubmitFailed.is_accepted());
        assert!(!RecipientState::Queued.is_accepted());
    }

    #[test]
    fn message_status_round_trips_through_text() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Submitted,
            MessageStatus::Sent,
            MessageStatus::Partial,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn campaign_status_round_trips_through_text() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Active,
            CampaignStatus::Completed,
            CampaignStatus::Partial,
            CampaignStatus::Failed,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
    }
}
