//! HTTP implementation of [`SmsProvider`].
//!
//! Wire format: `GET {base}/SendSMS` with query credentials and a
//! comma-joined `MobileNumbers` list; `GET {base}/MessageStatus` per
//! provider message id. The provider is loose about numeric fields
//! (`ErrorCode` and `MessageId` arrive as numbers or strings depending on
//! gateway version), so the DTOs tolerate both.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, warn};

use crate::{
    DeliveryBucket, GatewayConfig, GatewayError, PersonalizedEntry, SmsProvider, StatusOutcome,
    SubmissionEntry, SubmissionOutcome,
};

const PROVIDER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct HttpSmsGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpSmsGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    async fn send_sms_call(
        &self,
        sender_id: &str,
        body: &str,
        numbers: &str,
    ) -> Result<serde_json::Value, String> {
        let url = format!("{}/SendSMS", self.config.base_url);
        debug!(url = %url, numbers = %numbers, "Submitting to provider");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ApiKey", self.config.api_key.as_str()),
                ("ClientId", self.config.client_id.as_str()),
                ("SenderId", sender_id),
                ("Message", body),
                ("MobileNumbers", numbers),
            ])
            .send()
            .await
            .map_err(|e| format!("transport: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("transport: HTTP {status}: {body}"));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("transport: invalid response body: {e}"))
    }

    /// Turn one parsed submit response into per-recipient entries, aligned
    /// to the recipient list that was sent.
    fn entries_from_response(
        recipients: &[String],
        raw: &serde_json::Value,
    ) -> Vec<SubmissionEntry> {
        let parsed: SendSmsResponse = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Unparseable provider submit response");
                return reject_all(recipients, &format!("transport: unparseable response: {e}"));
            }
        };

        if parsed.error_code != 0 {
            let description = parsed
                .error_description
                .unwrap_or_else(|| format!("provider error code {}", parsed.error_code));
            warn!(code = parsed.error_code, description = %description, "Provider rejected submission");
            return reject_all(recipients, &description);
        }

        recipients
            .iter()
            .enumerate()
            .map(|(i, phone)| {
                // Provider echoes numbers back; match on them, falling back
                // to position for gateways that omit the echo.
                let entry = parsed
                    .data
                    .iter()
                    .find(|e| e.mobile_number.as_deref() == Some(phone.as_str()))
                    .or_else(|| parsed.data.get(i));

                match entry {
                    Some(e) if e.message_error_code == 0 && e.message_id.is_some() => {
                        SubmissionEntry {
                            phone: phone.clone(),
                            provider_message_id: e.message_id.clone(),
                            accepted: true,
                            error: None,
                        }
                    }
                    Some(e) => {
                        let error = e
                            .message_error_description
                            .clone()
                            .unwrap_or_else(|| format!("rejected (code {})", e.message_error_code));
                        warn!(phone = %phone, error = %error, "Provider rejected recipient");
                        SubmissionEntry {
                            phone: phone.clone(),
                            provider_message_id: None,
                            accepted: false,
                            error: Some(error),
                        }
                    }
                    None => SubmissionEntry {
                        phone: phone.clone(),
                        provider_message_id: None,
                        accepted: false,
                        error: Some("no result entry in provider response".to_string()),
                    },
                }
            })
            .collect()
    }
}

fn reject_all(recipients: &[String], error: &str) -> Vec<SubmissionEntry> {
    recipients
        .iter()
        .map(|phone| SubmissionEntry {
            phone: phone.clone(),
            provider_message_id: None,
            accepted: false,
            error: Some(error.to_string()),
        })
        .collect()
}

#[async_trait]
impl SmsProvider for HttpSmsGateway {
    async fn submit(
        &self,
        sender_id: &str,
        body: &str,
        recipients: &[String],
    ) -> SubmissionOutcome {
        let numbers = recipients.join(",");

        match self.send_sms_call(sender_id, body, &numbers).await {
            Ok(raw) => {
                let entries = Self::entries_from_response(recipients, &raw);
                SubmissionOutcome { entries, raw }
            }
            Err(e) => {
                error!(error = %e, count = recipients.len(), "Submission transport failure");
                SubmissionOutcome {
                    entries: reject_all(recipients, &e),
                    raw: serde_json::Value::Null,
                }
            }
        }
    }

    async fn submit_personalized(
        &self,
        sender_id: &str,
        entries: &[PersonalizedEntry],
    ) -> SubmissionOutcome {
        let mut results = Vec::with_capacity(entries.len());
        let mut raws = Vec::with_capacity(entries.len());

        for entry in entries {
            let recipient = std::slice::from_ref(&entry.phone);
            match self.send_sms_call(sender_id, &entry.body, &entry.phone).await {
                Ok(raw) => {
                    results.extend(Self::entries_from_response(recipient, &raw));
                    raws.push(raw);
                }
                Err(e) => {
                    error!(phone = %entry.phone, error = %e, "Personalized submission transport failure");
                    results.extend(reject_all(recipient, &e));
                    raws.push(serde_json::Value::Null);
                }
            }
        }

        SubmissionOutcome {
            entries: results,
            raw: serde_json::Value::Array(raws),
        }
    }

    async fn check_status(
        &self,
        provider_message_id: &str,
    ) -> Result<StatusOutcome, GatewayError> {
        let url = format!("{}/MessageStatus", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ApiKey", self.config.api_key.as_str()),
                ("ClientId", self.config.client_id.as_str()),
                ("MessageId", provider_message_id),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!("HTTP {status}: {body}")));
        }

        let parsed: MessageStatusResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid response body: {e}")))?;

        if parsed.error_code != 0 {
            return Err(GatewayError::Provider {
                code: parsed.error_code,
                description: parsed
                    .error_description
                    .unwrap_or_else(|| "status lookup failed".to_string()),
            });
        }

        let data = parsed.data.ok_or(GatewayError::Provider {
            code: 0,
            description: "status response carried no data".to_string(),
        })?;

        let raw_token = data.status.unwrap_or_default();
        let bucket = classify_status_token(&raw_token);
        debug!(message_id = %provider_message_id, token = %raw_token, ?bucket, "Status poll");

        Ok(StatusOutcome {
            bucket,
            raw_token,
            submit_time: parse_provider_time(data.submit_date.as_deref()),
            done_time: parse_provider_time(data.done_date.as_deref()),
        })
    }
}

/// Fixed mapping from the provider's open token vocabulary. Unknown tokens
/// land in `Pending` so a new provider token never flips deliveries to
/// failures.
pub fn classify_status_token(token: &str) -> DeliveryBucket {
    match token.trim().to_ascii_uppercase().as_str() {
        "DELIVRD" | "DELIVERED" => DeliveryBucket::Delivered,
        "UNDELIV" | "FAILED" | "REJECTD" | "EXPIRED" | "ERROR" => DeliveryBucket::Failed,
        _ => DeliveryBucket::Pending,
    }
}

fn parse_provider_time(s: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, PROVIDER_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// Wire DTOs. Field shapes vary across provider gateway versions, hence the
// number-or-string tolerance and defaults everywhere.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendSmsResponse {
    #[serde(default, deserialize_with = "lenient_i64")]
    error_code: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    data: Vec<SendSmsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendSmsEntry {
    #[serde(default)]
    mobile_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    message_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    message_error_code: i64,
    #[serde(default)]
    message_error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageStatusResponse {
    #[serde(default, deserialize_with = "lenient_i64")]
    error_code: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    data: Option<MessageStatusData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageStatusData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    submit_date: Option<String>,
    #[serde(default)]
    done_date: Option<String>,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Int(v)) => Ok(v),
        Some(Raw::Str(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}
