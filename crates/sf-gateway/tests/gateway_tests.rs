//! Gateway integration tests against a mock provider endpoint.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sf_gateway::{
    DeliveryBucket, GatewayConfig, GatewayError, HttpSmsGateway, PersonalizedEntry, SmsProvider,
};

fn gateway_for(server: &MockServer) -> HttpSmsGateway {
    HttpSmsGateway::new(GatewayConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        client_id: "test-client".to_string(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

#[tokio::test]
async fn submit_accepts_all_recipients() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .and(query_param("ApiKey", "test-key"))
        .and(query_param("ClientId", "test-client"))
        .and(query_param("SenderId", "SMSFLW"))
        .and(query_param("MobileNumbers", "919000000001,919000000002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "ErrorDescription": "Success",
            "Data": [
                {"MobileNumber": "919000000001", "MessageId": "MID-1", "MessageErrorCode": 0},
                {"MobileNumber": "919000000002", "MessageId": "MID-2", "MessageErrorCode": 0}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let outcome = gateway
        .submit(
            "SMSFLW",
            "hello",
            &["919000000001".to_string(), "919000000002".to_string()],
        )
        .await;

    assert_eq!(outcome.accepted_count(), 2);
    assert_eq!(outcome.entries[0].provider_message_id.as_deref(), Some("MID-1"));
    assert_eq!(outcome.entries[1].provider_message_id.as_deref(), Some("MID-2"));
    assert_eq!(outcome.raw["ErrorCode"], 0);
}

#[tokio::test]
async fn submit_reports_per_entry_rejections() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": [
                {"MobileNumber": "919000000001", "MessageId": "MID-1", "MessageErrorCode": 0},
                {"MobileNumber": "0000", "MessageId": null, "MessageErrorCode": 28,
                 "MessageErrorDescription": "Invalid mobile number"}
            ]
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let outcome = gateway
        .submit(
            "SMSFLW",
            "hello",
            &["919000000001".to_string(), "0000".to_string()],
        )
        .await;

    assert_eq!(outcome.accepted_count(), 1);
    assert!(outcome.entries[0].accepted);
    assert!(!outcome.entries[1].accepted);
    assert_eq!(
        outcome.entries[1].error.as_deref(),
        Some("Invalid mobile number")
    );
}

#[tokio::test]
async fn whole_call_rejection_marks_every_recipient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 5,
            "ErrorDescription": "Invalid ApiKey"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let outcome = gateway
        .submit(
            "SMSFLW",
            "hello",
            &["919000000001".to_string(), "919000000002".to_string()],
        )
        .await;

    assert_eq!(outcome.accepted_count(), 0);
    for entry in &outcome.entries {
        assert!(!entry.accepted);
        assert_eq!(entry.error.as_deref(), Some("Invalid ApiKey"));
    }
}

#[tokio::test]
async fn transport_failure_tags_every_recipient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let outcome = gateway
        .submit("SMSFLW", "hello", &["919000000001".to_string()])
        .await;

    assert_eq!(outcome.accepted_count(), 0);
    assert!(outcome.entries[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("transport:"));
    assert!(outcome.raw.is_null());
}

#[tokio::test]
async fn personalized_makes_one_call_per_entry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .and(query_param("Message", "Hi Asha"))
        .and(query_param("MobileNumbers", "919000000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": [{"MobileNumber": "919000000001", "MessageId": "MID-1", "MessageErrorCode": 0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/SendSMS"))
        .and(query_param("Message", "Hi Ravi"))
        .and(query_param("MobileNumbers", "919000000002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": [{"MobileNumber": "919000000002", "MessageId": "MID-2", "MessageErrorCode": 0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let outcome = gateway
        .submit_personalized(
            "SMSFLW",
            &[
                PersonalizedEntry {
                    phone: "919000000001".to_string(),
                    body: "Hi Asha".to_string(),
                },
                PersonalizedEntry {
                    phone: "919000000002".to_string(),
                    body: "Hi Ravi".to_string(),
                },
            ],
        )
        .await;

    assert_eq!(outcome.accepted_count(), 2);
    assert_eq!(outcome.entries.len(), 2);
    // Raw snapshot keeps one response per call
    assert_eq!(outcome.raw.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn status_maps_delivered_with_timestamps() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/MessageStatus"))
        .and(query_param("MessageId", "MID-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": {
                "MobileNumber": "919000000001",
                "Status": "DELIVRD",
                "SubmitDate": "2026-03-14 09:30:00",
                "DoneDate": "2026-03-14 09:31:05"
            }
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let status = gateway.check_status("MID-1").await.unwrap();

    assert_eq!(status.bucket, DeliveryBucket::Delivered);
    assert_eq!(status.raw_token, "DELIVRD");
    assert!(status.submit_time.is_some());
    assert!(status.done_time.unwrap() > status.submit_time.unwrap());
}

#[tokio::test]
async fn status_maps_failure_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/MessageStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": {"MobileNumber": "919000000001", "Status": "UNDELIV"}
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let status = gateway.check_status("MID-1").await.unwrap();

    assert_eq!(status.bucket, DeliveryBucket::Failed);
    assert_eq!(status.raw_token, "UNDELIV");
}

#[tokio::test]
async fn unknown_status_token_stays_pending_and_is_preserved() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/MessageStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 0,
            "Data": {"MobileNumber": "919000000001", "Status": "AWAITED_DLR"}
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let status = gateway.check_status("MID-1").await.unwrap();

    assert_eq!(status.bucket, DeliveryBucket::Pending);
    assert_eq!(status.raw_token, "AWAITED_DLR");
}

#[tokio::test]
async fn status_transport_failure_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/MessageStatus"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway.check_status("MID-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
}

#[tokio::test]
async fn status_provider_rejection_carries_code() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/MessageStatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ErrorCode": 7,
            "ErrorDescription": "Invalid MessageId"
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let err = gateway.check_status("bogus").await.unwrap_err();
    match err {
        GatewayError::Provider { code, description } => {
            assert_eq!(code, 7);
            assert_eq!(description, "Invalid MessageId");
        }
        other => panic!("unexpected error: {other}"),
    }
}
