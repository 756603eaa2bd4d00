//! Integration tests for the hub sync cycle.

use std::collections::HashMap;

use httpmock::{Method::POST, MockServer};

use apimeter::{Client, ClientConfig, ErrorInfo, PathInfo, RequestLoggingConfig};

const CLIENT_ID: &str = "8e8f06d1-4bde-4a8c-9b65-57b3d2f0e2f1";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn hub_config(server: &MockServer) -> ClientConfig {
    init_tracing();
    let mut config = ClientConfig::new(CLIENT_ID, "dev");
    config.hub_base_url = Some(server.base_url());
    config
}

fn hub_path(endpoint: &str) -> String {
    format!("/v2/{CLIENT_ID}/dev/{endpoint}")
}

#[tokio::test]
async fn startup_data_is_resent_until_acknowledged() {
    let server = MockServer::start_async().await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;
    // 400 is terminal for this request but leaves the startup data queued.
    let mut startup = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("startup"));
            then.status(400);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    client.set_startup_data(
        vec![PathInfo::new("GET", "/items")],
        HashMap::from([("rust".to_string(), "1.79.0".to_string())]),
        "rs:test",
    );

    client.sync_now().await;
    assert_eq!(startup.hits_async().await, 1);

    startup.delete_async().await;
    let startup_ok = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(hub_path("startup"))
                .body_contains("\"client\":\"rs:test\"");
            then.status(202);
        })
        .await;

    client.sync_now().await;
    client.sync_now().await;
    // Acknowledged on the first of the two cycles, never sent again.
    assert_eq!(startup_ok.hits_async().await, 1);
    assert_eq!(sync.hits_async().await, 3);
}

#[tokio::test]
async fn sync_delivers_drained_metrics() {
    let server = MockServer::start_async().await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(hub_path("sync"))
                .body_contains("\"path\":\"/items\"")
                .body_contains("\"consumer\":\"acme\"")
                .body_contains("\"request_count\":2");
            then.status(202);
        })
        .await;
    let sync_rest = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    client.add_request(Some("acme"), "GET", "/items", 200, 45.0, 0, 3789);
    client.add_request(Some("acme"), "GET", "/items", 200, 52.0, 0, 3789);
    let error = ErrorInfo::new("app::DbError", "connection refused", "at handler");
    client.add_server_error(Some("acme"), "GET", "/items", &error);

    client.sync_now().await;
    assert_eq!(sync.hits_async().await, 1);

    // Everything was drained: the next cycle carries no metrics.
    client.sync_now().await;
    assert_eq!(sync.hits_async().await, 1);
    assert_eq!(sync_rest.hits_async().await, 1);
}

#[tokio::test]
async fn invalid_client_id_disables_the_client() {
    let server = MockServer::start_async().await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(404);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    assert!(client.is_enabled());

    client.sync_now().await;
    assert!(!client.is_enabled());
    assert_eq!(sync.hits_async().await, 1);

    // Disabled for good: no events accepted, no further hub traffic.
    client.add_request(None, "GET", "/items", 200, 1.0, 0, 0);
    client.sync_now().await;
    assert_eq!(sync.hits_async().await, 1);
}

#[tokio::test]
async fn validation_rejected_payloads_are_dropped() {
    let server = MockServer::start_async().await;
    let mut sync = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(422);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    client.add_request(None, "GET", "/items", 200, 1.0, 0, 0);
    client.sync_now().await;
    assert_eq!(sync.hits_async().await, 1);

    sync.delete_async().await;
    let sync_ok = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(hub_path("sync"))
                .body_contains("\"path\":\"/items\"");
            then.status(202);
        })
        .await;
    let sync_rest = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;

    // The rejected payload is gone; the drained metrics went with it.
    client.sync_now().await;
    assert_eq!(sync_ok.hits_async().await, 0);
    assert_eq!(sync_rest.hits_async().await, 1);
}

#[tokio::test]
async fn transient_failures_requeue_payloads_in_order() {
    let server = MockServer::start_async().await;
    // 400 maps to a retryable outcome without the transport-level retries.
    let mut sync = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(400);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    client.add_request(None, "GET", "/first", 200, 1.0, 0, 0);
    client.sync_now().await;
    assert_eq!(sync.hits_async().await, 1);

    sync.delete_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(hub_path("sync"))
                .body_contains("\"path\":\"/first\"");
            then.status(202);
        })
        .await;
    let rest = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;

    // The failed payload is sent before the new cycle's payload.
    client.sync_now().await;
    assert_eq!(first.hits_async().await, 1);
    assert_eq!(rest.hits_async().await, 1);
}

#[tokio::test]
async fn payment_required_suspends_log_shipping_only() {
    let server = MockServer::start_async().await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;
    let log = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("log"));
            then.status(402);
        })
        .await;

    let mut config = hub_config(&server);
    config.request_logging = RequestLoggingConfig {
        enabled: true,
        ..Default::default()
    };
    let client = Client::new(config).unwrap();

    client.log_request(
        apimeter::LoggedRequest::new("GET", "http://test/items"),
        apimeter::LoggedResponse::new(200, 0.005),
        None,
        Vec::new(),
        None,
    );
    client.request_logger().maintain();
    client.sync_now().await;

    assert_eq!(log.hits_async().await, 1);
    assert!(client.request_logger().is_suspended());
    // Metric collection is unaffected by the quota suspension.
    assert!(client.is_enabled());
    assert!(sync.hits_async().await >= 1);

    // Nothing left to upload while suspended.
    client.sync_now().await;
    assert_eq!(log.hits_async().await, 1);
}

#[tokio::test]
async fn shutdown_flushes_remaining_data() {
    let server = MockServer::start_async().await;
    let sync = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(hub_path("sync"))
                .body_contains("\"path\":\"/items\"");
            then.status(202);
        })
        .await;
    let sync_rest = server
        .mock_async(|when, then| {
            when.method(POST).path(hub_path("sync"));
            then.status(202);
        })
        .await;

    let client = Client::new(hub_config(&server)).unwrap();
    client.start();
    client.add_request(None, "GET", "/items", 200, 1.0, 0, 0);
    client.shutdown().await;

    assert_eq!(sync.hits_async().await, 1);
    assert!(sync_rest.hits_async().await <= 2);
    assert!(!client.is_enabled());
}
