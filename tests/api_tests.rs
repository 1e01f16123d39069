//! HTTP API served over a real socket

mod common;

use common::{backend, query, store_with_availability};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strata::api::{build_http_router, ApiState};
use strata::backend::InMemoryMetadataSource;
use strata::clock::MonotonicClock;
use strata::config::GatewayConfig;
use strata::loader::{
    HealthRegistry, Loader, LoaderHealthCheck, LoaderSchedule, LoaderScheduler,
    SegmentMetadataLoader,
};
use strata::metadata::SegmentInfo;
use strata::query::ResultSet;
use tokio::net::TcpListener;

struct Server {
    base: String,
    scheduler: Arc<LoaderScheduler>,
    loader: Arc<dyn Loader>,
}

async fn serve(config: GatewayConfig) -> Server {
    let store = store_with_availability("2024-01-01/2024-02-01");
    let source = Arc::new(InMemoryMetadataSource::new());
    source.set_segments(
        "traffic_daily",
        vec![SegmentInfo {
            interval: "2024-01-01/2024-02-01".parse().unwrap(),
            version: "v1".into(),
            partition: 0,
        }],
    );
    let loader: Arc<dyn Loader> = Arc::new(SegmentMetadataLoader::new(
        source,
        Arc::clone(&store),
        vec!["traffic_daily".into()],
        LoaderSchedule::once(Duration::ZERO),
    ));

    let scheduler = Arc::new(LoaderScheduler::new(1));
    scheduler.register(Arc::clone(&loader));
    let health = Arc::new(HealthRegistry::new());
    health.register(Arc::new(LoaderHealthCheck::new(
        Arc::clone(&loader),
        Duration::from_secs(600),
        Arc::new(MonotonicClock::new()),
    )));
    let pipeline = Arc::new(common::pipeline(&config, store, Arc::new(backend())));

    let router = build_http_router(ApiState {
        pipeline,
        health,
        scheduler: Arc::clone(&scheduler),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server {
        base: format!("http://{}", addr),
        scheduler,
        loader,
    }
}

#[tokio::test]
async fn test_health_and_ready_follow_loaders() {
    let server = serve(GatewayConfig::default()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", server.base)).send().await.unwrap();
    assert_eq!(health.status(), 503);
    let ready = client.get(format!("{}/ready", server.base)).send().await.unwrap();
    assert_eq!(ready.status(), 503);

    server.loader.tick().await.unwrap();

    let health = client.get(format!("{}/health", server.base)).send().await.unwrap();
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["healthy"], true);
    assert_eq!(body["checks"]["segment_metadata"]["healthy"], true);

    let ready = client.get(format!("{}/ready", server.base)).send().await.unwrap();
    assert_eq!(ready.status(), 200);
    server.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_data_endpoint_answers_and_counts() {
    let server = serve(GatewayConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/data", server.base))
        .json(&query("2024-01-01/2024-01-04"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let result: ResultSet = response.json().await.unwrap();
    assert_eq!(result.len(), 6);
    assert!(!result.is_partial());

    let status: Value = client
        .get(format!("{}/status", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["pipeline"]["requests"], 1);
    assert_eq!(status["pipeline"]["dispatches"], 1);
    assert!(status["loaders"]["segment_metadata"].is_object());
}

#[tokio::test]
async fn test_data_endpoint_maps_errors() {
    let config = GatewayConfig {
        weight_limit: 1,
        ..GatewayConfig::default()
    };
    let server = serve(config).await;
    let client = reqwest::Client::new();

    let too_heavy = client
        .post(format!("{}/v1/data", server.base))
        .json(&query("2024-01-01/2024-01-04"))
        .send()
        .await
        .unwrap();
    assert_eq!(too_heavy.status(), 507);
    let body: Value = too_heavy.json().await.unwrap();
    assert_eq!(body["class"], "weight_exceeded");

    let mut unknown = query("2024-01-01/2024-01-04");
    unknown.table = "nope".to_string();
    let unknown_table = client
        .post(format!("{}/v1/data", server.base))
        .json(&unknown)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_table.status(), 400);

    let malformed = client
        .post(format!("{}/v1/data", server.base))
        .header("content-type", "application/json")
        .body(r#"{"table": "traffic"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
    let body: Value = malformed.json().await.unwrap();
    assert_eq!(body["class"], "invalid_query");
}
