use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;

#[tokio::test]
async fn test_activate_and_deactivate() {
    let server = MockServer::start().await;
    let manager = online_manager(&server.uri(), ManualClock::new());
    let key = make_key(Tier::Pro, 30);
    manager.load_from_key(&key).unwrap();
    let license_id = manager.get_license().unwrap().id.clone();

    Mock::given(method("POST"))
        .and(path("/api/v1/activate"))
        .and(body_partial_json(json!({ "license_key": key, "hardware_id": TEST_HARDWARE_ID })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "instance_id": "inst-77"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/deactivate"))
        .and(body_partial_json(json!({
            "license_id": license_id,
            "instance_id": "inst-77",
            "hardware_id": TEST_HARDWARE_ID
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let instance = manager.activate().await.unwrap();
    assert_eq!(instance.as_deref(), Some("inst-77"));
    assert_eq!(manager.instance_id().as_deref(), Some("inst-77"));

    manager.deactivate().await.unwrap();
    assert!(manager.instance_id().is_none());
}

#[tokio::test]
async fn test_activation_falls_back_to_offline_when_server_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/activate"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let manager = online_manager(&server.uri(), ManualClock::new());
    manager.load_from_key(&make_key(Tier::Pro, 30)).unwrap();

    assert_eq!(manager.activate().await.unwrap(), None);
    assert!(manager.is_valid());
    assert_eq!(manager.tier(), Tier::Pro);
}

#[tokio::test]
async fn test_activation_falls_back_when_unreachable() {
    let manager = online_manager("http://127.0.0.1:1", ManualClock::new());
    manager.load_from_key(&make_key(Tier::Pro, 30)).unwrap();

    assert_eq!(manager.activate().await.unwrap(), None);
    assert!(manager.is_valid());
}

#[tokio::test]
async fn test_activation_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "activation limit reached"
        })))
        .mount(&server)
        .await;

    let manager = online_manager(&server.uri(), ManualClock::new());
    manager.load_from_key(&make_key(Tier::Pro, 30)).unwrap();

    let err = manager.activate().await.unwrap_err();
    assert!(matches!(err, LicenseError::InvalidLicense(ref m) if m == "activation limit reached"));
}

#[tokio::test]
async fn test_activation_client_error_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/activate"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "license suspended" })))
        .mount(&server)
        .await;

    let manager = online_manager(&server.uri(), ManualClock::new());
    manager.load_from_key(&make_key(Tier::Pro, 30)).unwrap();

    match manager.activate().await.unwrap_err() {
        LicenseError::Server { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "license suspended");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_offline_activation_is_noop() {
    let manager = offline_manager();
    manager.load_from_key(&make_key(Tier::Pro, 30)).unwrap();

    assert_eq!(manager.activate().await.unwrap(), None);
    assert!(manager.deactivate().await.is_ok());
}

#[tokio::test]
async fn test_activate_without_license() {
    let manager = offline_manager();
    assert!(matches!(manager.activate().await, Err(LicenseError::NoLicense)));
}

#[tokio::test]
async fn test_activation_sends_refreshed_key() {
    let server = MockServer::start().await;
    let manager = online_manager(&server.uri(), ManualClock::new());
    let original = make_key(Tier::Pro, 30);
    manager.load_from_key(&original).unwrap();

    let (renewed, renewed_key) =
        make_key_with(GenerateRequest::new("cust-1", "Acme Corp", Tier::Enterprise, 365));
    Mock::given(method("POST"))
        .and(path("/api/v1/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": true, "license": renewed })))
        .mount(&server)
        .await;
    manager.validate_online().await.unwrap();
    assert_eq!(manager.get_license().unwrap().id, renewed.id);

    Mock::given(method("POST"))
        .and(path("/api/v1/activate"))
        .and(body_partial_json(json!({ "license_key": renewed_key })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "instance_id": "inst-88"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let instance = manager.activate().await.unwrap();
    assert_eq!(instance.as_deref(), Some("inst-88"));
}
