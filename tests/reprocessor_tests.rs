//! Integration tests for dead-letter replay.

mod common;

use common::{ProcessingFixture, ScriptedRepository, StaticCatalog};
use integrations_catalog_pipeline::dlq::DurableQueue;
use integrations_catalog_pipeline::{
    DlqMessage, Document, ItemType, PipelineOrchestrator, Reprocessor, ReprocessorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> ReprocessorConfig {
    ReprocessorConfig {
        batch_size: 10,
        wait_time: Duration::ZERO,
        idle_delay: Duration::from_millis(10),
    }
}

async fn mount_status(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
}

async fn enqueue(queue: &dyn DurableQueue, id: i64) {
    let message = DlqMessage::new(ItemType::Post, Document::new().with("id", id), "pipeline");
    queue
        .send(serde_json::to_string(&message).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_message_deleted_only_after_successful_replay() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));
    enqueue(fixture.queue.as_ref(), 1).await;

    let reprocessor = Reprocessor::new(fixture.queue.clone(), fixture.client.clone(), config());
    let outcome = reprocessor.poll_once().await.unwrap();

    assert_eq!(outcome.replayed, 1);
    assert!(fixture.queue.is_empty());
}

#[tokio::test]
async fn test_failed_replay_leaves_message_for_redelivery() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_millis(50));
    enqueue(fixture.queue.as_ref(), 1).await;

    let reprocessor = Reprocessor::new(fixture.queue.clone(), fixture.client.clone(), config());
    let outcome = reprocessor.poll_once().await.unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(fixture.queue.len(), 1);

    // Replays never dead-letter a second copy.
    assert!(fixture.sink.get_fallback_items().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    mount_status(&server, 200).await;
    let outcome = reprocessor.poll_once().await.unwrap();
    assert_eq!(outcome.replayed, 1);
    assert!(fixture.queue.is_empty());
}

#[tokio::test]
async fn test_items_dead_lettered_by_a_run_are_replayed_after_recovery() {
    let server = MockServer::start().await;
    mount_status(&server, 503).await;
    let fixture = ProcessingFixture::new(format!("{}/post", server.uri()), Duration::from_secs(30));

    let orchestrator = PipelineOrchestrator::new(
        Arc::new(StaticCatalog::new([1, 2])),
        Arc::new(ScriptedRepository::new()),
        Arc::new(ScriptedRepository::new()),
        fixture.client.clone(),
    );
    orchestrator.run().await.unwrap();
    assert_eq!(fixture.queue.len(), 6);

    mount_status(&server, 200).await;
    let reprocessor = Reprocessor::new(fixture.queue.clone(), fixture.client.clone(), config());
    let outcome = reprocessor.poll_once().await.unwrap();

    assert_eq!(outcome.received, 6);
    assert_eq!(outcome.replayed, 6);
    assert!(fixture.queue.is_empty());
}
