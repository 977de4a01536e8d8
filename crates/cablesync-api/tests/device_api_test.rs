// Integration tests for `DeviceApi` using wiremock.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cablesync_api::{DeviceApi, DeviceState, Error, TransportConfig};
use secrecy::SecretString;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DeviceApi) {
    let server = MockServer::start().await;
    let base = format!("{}/api", server.uri()).parse().unwrap();
    let token = SecretString::from("operator-token".to_string());
    let api = DeviceApi::new(base, &token, &TransportConfig::default()).unwrap();
    (server, api)
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn list_devices_sends_bearer_token_and_unwraps_envelope() {
    let (server, api) = setup().await;

    let body = json!({
        "success": true,
        "data": [
            {
                "deviceId": "cable-1",
                "status": "online",
                "lastSeen": "2026-03-01T12:00:00Z",
                "batteryLevel": 91
            },
            {
                "deviceId": "cable-2",
                "status": "error",
                "lastSeen": "2026-03-01T11:58:00Z",
                "errors": ["usb enumeration failed"]
            }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .and(header("authorization", "Bearer operator-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let devices = api.list_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_id, "cable-1");
    assert_eq!(devices[0].battery_level, Some(91.0));
    assert_eq!(devices[1].status, DeviceState::Error);
    assert_eq!(
        devices[1].errors.as_deref(),
        Some(&["usb enumeration failed".to_string()][..])
    );
}

#[tokio::test]
async fn empty_device_list() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": [] })))
        .mount(&server)
        .await;

    assert!(api.list_devices().await.unwrap().is_empty());
}

// ── Error paths ─────────────────────────────────────────────────────

#[tokio::test]
async fn unsuccessful_envelope_is_api_error() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "message": "maintenance window" })),
        )
        .mount(&server)
        .await;

    let err = api.list_devices().await.unwrap_err();
    assert!(
        matches!(err, Error::Api { ref message } if message == "maintenance window"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = api.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { status: 401 }));
    assert!(err.is_auth_rejected());
}

#[tokio::test]
async fn server_error_is_transport_error() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = api.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn malformed_record_fails_whole_response() {
    let (server, api) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{ "deviceId": "cable-1" }]
        })))
        .mount(&server)
        .await;

    let err = api.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}
