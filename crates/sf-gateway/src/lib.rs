//! Provider gateway.
//!
//! The only crate that talks HTTP to the SMS provider. Translates the
//! provider's submit and status endpoints into typed outcomes; the open
//! status vocabulary collapses into three buckets here and nowhere else.
//!
//! Submission failures are data, not errors: a transport or provider
//! failure surfaces as rejected entries inside `SubmissionOutcome`, so
//! the caller can record per-recipient outcomes without unwinding.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod http;

pub use http::HttpSmsGateway;

/// Delivery bucket a raw provider status token maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryBucket {
    Delivered,
    Failed,
    /// Not yet terminal, or a token we do not recognize. The raw token is
    /// kept alongside for diagnostics.
    Pending,
}

/// One recipient of a personalized dispatch: its own body per phone.
#[derive(Debug, Clone)]
pub struct PersonalizedEntry {
    pub phone: String,
    pub body: String,
}

/// Per-recipient result of a submission call.
#[derive(Debug, Clone)]
pub struct SubmissionEntry {
    pub phone: String,
    pub provider_message_id: Option<String>,
    pub accepted: bool,
    pub error: Option<String>,
}

/// Outcome of one submit round trip (or one per-entry series for
/// personalized sends). `raw` is the provider response verbatim, kept for
/// the message audit snapshot.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub entries: Vec<SubmissionEntry>,
    pub raw: serde_json::Value,
}

impl SubmissionOutcome {
    pub fn accepted_count(&self) -> i64 {
        self.entries.iter().filter(|e| e.accepted).count() as i64
    }
}

/// Outcome of one status poll.
#[derive(Debug, Clone)]
pub struct StatusOutcome {
    pub bucket: DeliveryBucket,
    /// The provider's token exactly as received.
    pub raw_token: String,
    pub submit_time: Option<DateTime<Utc>>,
    pub done_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("provider error {code}: {description}")]
    Provider { code: i64, description: String },
}

/// Connection settings for the provider endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub client_id: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mylogin.co.in/api/v2".to_string(),
            api_key: String::new(),
            client_id: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The seam the engine dispatches through. Tests substitute their own
/// implementation; production uses [`HttpSmsGateway`].
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// One shared body to many recipients in a single round trip.
    async fn submit(&self, sender_id: &str, body: &str, recipients: &[String])
        -> SubmissionOutcome;

    /// Per-recipient bodies. The provider takes one body per call, so this
    /// makes one round trip per entry.
    async fn submit_personalized(
        &self,
        sender_id: &str,
        entries: &[PersonalizedEntry],
    ) -> SubmissionOutcome;

    /// Poll delivery status for one provider-assigned message id.
    async fn check_status(&self, provider_message_id: &str)
        -> Result<StatusOutcome, GatewayError>;
}
