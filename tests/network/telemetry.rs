use std::time::Duration;

use licensegate::telemetry::{TelemetryClient, UsageCollector, UsageEvent};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn telemetry_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/telemetry"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

async fn delivered_events(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(|r| serde_json::from_slice::<Vec<serde_json::Value>>(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_flush_posts_batch_as_array() {
    let server = telemetry_server(202).await;
    let client = TelemetryClient::new(&server.uri());

    client.track(UsageEvent::new("startup", "hw-1").with_license("lic-1"));
    client.track(UsageEvent::new("connector_added", "hw-1").with_data(json!({ "type": "postgres" })));
    assert_eq!(client.pending(), 2);

    client.flush().await;
    assert_eq!(client.pending(), 0);

    let events = delivered_events(&server).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event_type"], "startup");
    assert_eq!(events[0]["license_id"], "lic-1");
    assert_eq!(events[1]["data"]["type"], "postgres");
}

#[tokio::test]
async fn test_reaching_capacity_flushes_in_background() {
    let server = telemetry_server(200).await;
    let client = TelemetryClient::with_capacity(&server.uri(), 3);

    for i in 0..3 {
        client.track(UsageEvent::new(format!("event-{i}"), "hw"));
    }
    assert_eq!(client.pending(), 0);

    for _ in 0..50 {
        if !server.received_requests().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered_events(&server).await.len(), 3);
}

#[tokio::test]
async fn test_delivery_errors_are_swallowed() {
    let server = telemetry_server(500).await;
    let client = TelemetryClient::new(&server.uri());
    client.track(UsageEvent::new("startup", "hw"));
    client.flush().await;
    assert_eq!(client.pending(), 0);

    let unreachable = TelemetryClient::new("http://127.0.0.1:1");
    unreachable.track(UsageEvent::new("startup", "hw"));
    unreachable.flush().await;
    assert_eq!(unreachable.pending(), 0);
}

#[tokio::test]
async fn test_empty_flush_sends_nothing() {
    let server = telemetry_server(200).await;
    TelemetryClient::new(&server.uri()).flush().await;
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_heartbeat_carries_usage_metrics() {
    let server = telemetry_server(200).await;
    let client = TelemetryClient::new(&server.uri());
    let usage = UsageCollector::new();
    usage.record_events(1200, 64_000);
    usage.record_feature_usage("kafka_sink");

    client.track(UsageEvent::heartbeat(Some("lic-9"), "hw", &usage.get_metrics()));
    client.flush().await;

    let events = delivered_events(&server).await;
    assert_eq!(events[0]["event_type"], "heartbeat");
    assert_eq!(events[0]["data"]["events_processed"], 1200);
    assert_eq!(events[0]["data"]["features_used"], json!(["kafka_sink"]));
}
