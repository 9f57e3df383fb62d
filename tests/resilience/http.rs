//! The command service and health report over HTTP.

use std::sync::Arc;

use serde_json::{json, Value};
use trackwise_resilience::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use trackwise_resilience::health::HealthCheck;
use trackwise_resilience::rpc::{self, HandlerError, Service};
use trackwise_resilience::store::InMemoryStore;

use crate::support::{init_tracing, record_entry};

fn scores_service() -> Arc<Service<()>> {
    Arc::new(Service::new(()).command("risk.score", |ctx| {
        match ctx.raw_input()["account"].as_str() {
            Some(account) => Ok(json!({ "account": account, "caller": ctx.session().caller() })),
            None => Err(HandlerError::Rejected("account required".into())),
        }
    }))
}

async fn start_server(service: Arc<Service<()>>, health: Arc<HealthCheck>) -> String {
    let app = rpc::router(service, health);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn commands_dispatch_with_headers_as_session() {
    init_tracing();
    let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let base = start_server(scores_service(), Arc::new(HealthCheck::new(registry))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/risk.score"))
        .header("x-caller-service", "ledger-service")
        .json(&json!({ "account": "acct-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "account": "acct-1", "caller": "ledger-service" }));

    let resp = client
        .post(format!("{base}/risk.score"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "rejected: account required");

    let resp = client
        .post(format!("{base}/risk.explain"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn health_reflects_breakers_and_outbox() {
    init_tracing();
    let registry = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::default().with_failure_threshold(1),
    ));
    let ledger = InMemoryStore::new();
    record_entry(&ledger, "acct-1", 1, 100);
    let health = Arc::new(HealthCheck::new(Arc::clone(&registry)).with_outbox(Arc::new(ledger)));
    let base = start_server(scores_service(), health).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "up");
    assert_eq!(body["outbox"]["pending"], 1);

    let _ = registry
        .get_or_create("intelligence")
        .call(|| Err::<(), _>("connection refused"));

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["breakers"][0]["name"], "intelligence");
    assert_eq!(body["breakers"][0]["state"], "Open");
}
