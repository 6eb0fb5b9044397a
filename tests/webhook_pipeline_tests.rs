//! Webhook delivery and retry queue integration tests.

mod test_utils;

use caldav_sync::config::WebhookConfig;
use caldav_sync::event::SyncDirection;
use caldav_sync::models::webhook_retry;
use caldav_sync::repositories::sync_log::{SyncLogFinalize, SyncLogRepository};
use caldav_sync::repositories::webhook_retry::WebhookRetryRepository;
use caldav_sync::sync::clock::Clock;
use caldav_sync::sync::webhook::WebhookPipeline;
use chrono::Utc;
use sea_orm::EntityTrait;
use std::sync::Arc;
use test_utils::{FixedClock, insert_mapping, setup_test_db, test_crypto_key};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct WebhookHarness {
    db: Arc<sea_orm::DatabaseConnection>,
    pipeline: WebhookPipeline,
    clock: Arc<FixedClock>,
    mapping: caldav_sync::models::mapping::Model,
    sync_logs: SyncLogRepository,
}

async fn setup(webhook_url: Option<&str>) -> WebhookHarness {
    let db = setup_test_db().await;

    let accounts = caldav_sync::repositories::account::AccountRepository::new(
        db.clone(),
        test_crypto_key(),
    );
    let account = accounts
        .create("acct", "user", "pass", "https://dav.example.test/", true)
        .await
        .expect("insert account");

    let mapping = insert_mapping(&db, account.id, SyncDirection::CaldavToGoogle, webhook_url).await;

    let clock = Arc::new(FixedClock::new());
    let sync_logs = SyncLogRepository::new(db.clone());
    let pipeline = WebhookPipeline::new(
        WebhookConfig::default(),
        clock.clone(),
        sync_logs.clone(),
        WebhookRetryRepository::new(db.clone()),
    );

    WebhookHarness {
        db,
        pipeline,
        clock,
        mapping,
        sync_logs,
    }
}

/// Open a log row and finalize it the way a finished run would.
async fn finalized_log(
    harness: &WebhookHarness,
    status: &str,
) -> caldav_sync::models::sync_log::Model {
    let log = harness
        .sync_logs
        .open_running(
            harness.mapping.id,
            SyncDirection::CaldavToGoogle,
            harness.clock.now_utc(),
        )
        .await
        .expect("open log");

    harness
        .sync_logs
        .finalize(
            log.id,
            harness.mapping.id,
            SyncLogFinalize {
                status,
                inserted: 2,
                updated: 1,
                deleted: 0,
                errors: 0,
                error_message: None,
                event_summaries: &["Standup".to_string(), "Planning".to_string()],
                change_summary: Some("Synced: Standup, Planning".to_string()),
                completed_at: harness.clock.now_utc(),
                duration_seconds: 3,
            },
        )
        .await
        .expect("finalize log");

    harness
        .sync_logs
        .get(log.id)
        .await
        .expect("reload log")
        .expect("log exists")
}

#[tokio::test]
async fn payload_carries_terminal_state_and_counts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("User-Agent", "caldav-sync/1.0"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/hook", server.uri());
    let harness = setup(Some(&url)).await;
    let log = finalized_log(&harness, "success").await;

    let delivered = harness.pipeline.send_sync_result(&harness.mapping, &log).await;
    assert!(delivered);

    let requests = server.received_requests().await.expect("recorded");
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");

    assert_eq!(body["mapping_id"], harness.mapping.id.to_string());
    assert_eq!(body["direction"], "caldav_to_google");
    assert_eq!(body["status"], "success");
    assert_eq!(body["inserted"], 2);
    assert_eq!(body["updated"], 1);
    assert_eq!(body["deleted"], 0);
    assert_eq!(body["events"][0], "Standup");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

    // The log records the delivery outcome
    let log = harness
        .sync_logs
        .get(log.id)
        .await
        .expect("reload")
        .expect("exists");
    assert!(log.webhook_sent);
    assert_eq!(log.webhook_status.as_deref(), Some("success"));

    // Nothing queued for retry
    let retries = webhook_retry::Entity::find()
        .all(harness.db.as_ref())
        .await
        .expect("query retries");
    assert!(retries.is_empty());
}

#[tokio::test]
async fn missing_webhook_url_is_immediate_success() {
    let harness = setup(None).await;
    let log = finalized_log(&harness, "success").await;

    assert!(harness.pipeline.send_sync_result(&harness.mapping, &log).await);
}

#[tokio::test]
async fn failed_delivery_queues_a_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/hook", server.uri());
    let harness = setup(Some(&url)).await;
    let log = finalized_log(&harness, "failure").await;

    let delivered = harness.pipeline.send_sync_result(&harness.mapping, &log).await;
    assert!(!delivered);

    let retries = webhook_retry::Entity::find()
        .all(harness.db.as_ref())
        .await
        .expect("query retries");
    assert_eq!(retries.len(), 1);

    let retry = &retries[0];
    assert_eq!(retry.attempt_count, 0);
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.sync_log_id, log.id);
    // First retry follows the first configured delay (30 s)
    let expected = harness.clock.now_utc() + chrono::Duration::seconds(30);
    assert_eq!(retry.next_retry_at.with_timezone(&Utc), expected);

    let log = harness
        .sync_logs
        .get(log.id)
        .await
        .expect("reload")
        .expect("exists");
    assert_eq!(log.webhook_status.as_deref(), Some("failure"));
}

#[tokio::test]
async fn retry_decay_follows_the_delay_ladder_until_exhausted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/hook", server.uri());
    let harness = setup(Some(&url)).await;
    let log = finalized_log(&harness, "partial_failure").await;

    harness.pipeline.send_sync_result(&harness.mapping, &log).await;

    // Make the row due and process it three times
    let retries_repo = WebhookRetryRepository::new(harness.db.clone());
    for expected_attempt in 1..=3 {
        let row = webhook_retry::Entity::find()
            .one(harness.db.as_ref())
            .await
            .expect("query")
            .expect("row exists");
        // Force the row due regardless of its schedule
        retries_repo
            .record_failure(
                &caldav_sync::models::webhook_retry::Model {
                    attempt_count: row.attempt_count - 1,
                    ..row.clone()
                },
                harness.clock.now_utc() - chrono::Duration::seconds(1),
                row.last_error.clone().unwrap_or_default(),
            )
            .await
            .expect("reschedule into the past");

        let delivered = harness.pipeline.process_due_retries().await;
        assert_eq!(delivered, 0);

        let row = webhook_retry::Entity::find()
            .one(harness.db.as_ref())
            .await
            .expect("query")
            .expect("row retained");
        assert_eq!(row.attempt_count, expected_attempt);
    }

    // Exhausted rows are retained but never due again
    let row = webhook_retry::Entity::find()
        .one(harness.db.as_ref())
        .await
        .expect("query")
        .expect("row retained for observability");
    assert_eq!(row.attempt_count, row.max_attempts);

    let due = retries_repo
        .due(harness.clock.now_utc() + chrono::Duration::days(365))
        .await
        .expect("query due");
    assert!(due.is_empty());
}

#[tokio::test]
async fn successful_retry_removes_the_row() {
    let flaky = MockServer::start().await;

    // First delivery fails, retry succeeds
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&flaky)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&flaky)
        .await;

    let url = format!("{}/hook", flaky.uri());
    let harness = setup(Some(&url)).await;
    let log = finalized_log(&harness, "success").await;

    assert!(!harness.pipeline.send_sync_result(&harness.mapping, &log).await);

    // Pull the retry due date into the past, then process
    let retries_repo = WebhookRetryRepository::new(harness.db.clone());
    let row = webhook_retry::Entity::find()
        .one(harness.db.as_ref())
        .await
        .expect("query")
        .expect("row exists");
    retries_repo
        .record_failure(
            &caldav_sync::models::webhook_retry::Model {
                attempt_count: row.attempt_count - 1,
                ..row.clone()
            },
            harness.clock.now_utc() - chrono::Duration::seconds(1),
            "forced due".to_string(),
        )
        .await
        .expect("reschedule");

    let delivered = harness.pipeline.process_due_retries().await;
    assert_eq!(delivered, 1);

    let rows = webhook_retry::Entity::find()
        .all(harness.db.as_ref())
        .await
        .expect("query");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn retry_stats_reflect_queue_state() {
    let harness = setup(None).await;
    let log = finalized_log(&harness, "failure").await;

    let retries_repo = WebhookRetryRepository::new(harness.db.clone());
    retries_repo
        .enqueue(
            log.id,
            "https://unreachable.example.test/hook",
            serde_json::json!({"status": "failure"}),
            3,
            harness.clock.now_utc(),
            Some("connection refused".to_string()),
        )
        .await
        .expect("enqueue");

    let stats = harness.pipeline.retry_stats().await.expect("stats");
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.failed, 0);
    assert!(stats.next_retry_at.is_some());
}
