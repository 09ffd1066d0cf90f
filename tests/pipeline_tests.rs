//! End-to-end tests for pipeline runs.

mod common;

use common::{berry, guard, posted_ids, ProcessingFixture, ScriptedRepository, StaticCatalog};
use integrations_catalog_pipeline::transport::ReqwestTransport;
use integrations_catalog_pipeline::{
    DefaultMetricsCollector, ItemErrorStatus, MetricsCollector, PipelineOrchestrator,
    PokeApiCatalog,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn accepting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_persistence_error_on_one_item_leaves_others_processed() {
    let server = accepting_server().await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));
    let posts = Arc::new(ScriptedRepository::new().failing("2"));

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(StaticCatalog::new([1, 2, 3])),
        posts.clone(),
        Arc::new(ScriptedRepository::new()),
        fixture.client.clone(),
    );
    let stats = orchestrator.run().await.unwrap();

    assert_eq!(stats.posts_processed, 2);
    assert_eq!(stats.post_errors.len(), 1);
    assert_eq!(stats.post_errors[0].item_id, "2");
    assert_eq!(stats.post_errors[0].status, ItemErrorStatus::PersistFailed);
    assert_eq!(stats.comments_processed, 4);
    assert_eq!(posts.saved(), vec!["1", "3"]);

    let posted = posted_ids(&server).await;
    assert!(posted.contains(&"1".to_string()));
    assert!(posted.contains(&"3".to_string()));
    assert!(!posted.contains(&"2".to_string()));
}

#[tokio::test]
async fn test_refused_item_never_reaches_processing_or_dlq() {
    let server = accepting_server().await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(StaticCatalog::new([1, 2])),
        Arc::new(ScriptedRepository::new().refusing("2")),
        Arc::new(ScriptedRepository::new()),
        fixture.client.clone(),
    );
    let stats = orchestrator.run().await.unwrap();

    assert_eq!(stats.posts_processed, 1);
    let failed: Vec<&str> = stats.post_errors.iter().map(|e| e.item_id.as_str()).collect();
    assert_eq!(failed, vec!["2"]);
    assert!(fixture.queue.is_empty());
    assert!(fixture.sink.get_fallback_items().await.unwrap().is_empty());
    assert!(!posted_ids(&server).await.contains(&"2".to_string()));
}

#[tokio::test]
async fn test_processing_outage_dead_letters_every_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));
    let metrics = Arc::new(DefaultMetricsCollector::new());

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(StaticCatalog::new([1])),
        Arc::new(ScriptedRepository::new()),
        Arc::new(ScriptedRepository::new()),
        fixture.client.clone(),
    )
    .with_metrics(metrics.clone());
    let stats = orchestrator.run().await.unwrap();

    // Dead-lettered items count as handled, not as failures.
    assert_eq!(stats.posts_processed, 1);
    assert_eq!(stats.comments_processed, 2);
    assert!(stats.is_clean());
    assert_eq!(fixture.queue.len(), 3);
    assert_eq!(metrics.get_metrics().posts_processed, 1);
}

#[tokio::test]
async fn test_malformed_listing_entry_does_not_abort_run() {
    let catalog_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/berry/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next": null,
            "results": [
                {"name": "berry-1", "url": format!("{}/berry/1/", catalog_server.uri())},
                {"name": "weird", "url": format!("{}/berry/weird/", catalog_server.uri())}
            ]
        })))
        .mount(&catalog_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/berry/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(berry(1).to_json().unwrap()))
        .expect(1)
        .mount(&catalog_server)
        .await;

    let server = accepting_server().await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));
    let catalog = PokeApiCatalog::new(
        Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()),
        guard("catalog", 2, 100),
        catalog_server.uri(),
    );

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(catalog),
        Arc::new(ScriptedRepository::new()),
        Arc::new(ScriptedRepository::new()),
        fixture.client.clone(),
    );
    let stats = orchestrator.run().await.unwrap();

    assert_eq!(stats.posts_processed, 1);
    assert_eq!(stats.comments_processed, 2);
    assert!(stats.is_clean());
    assert!(posted_ids(&server).await.contains(&"1".to_string()));
}
