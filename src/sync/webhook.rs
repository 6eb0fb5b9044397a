//! Webhook delivery pipeline with a durable retry queue.
//!
//! Delivery is fire-and-forget from the engine's point of view: a failed
//! POST lands in the `webhook_retries` table and a long-lived processor
//! retries it on an exponential-ish delay ladder until it succeeds or runs
//! out of attempts.

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WebhookConfig;
use crate::models::{mapping::Model as MappingModel, sync_log::Model as SyncLogModel};
use crate::repositories::sync_log::SyncLogRepository;
use crate::repositories::webhook_retry::{RetryStats, WebhookRetryRepository};
use crate::sync::clock::Clock;

const USER_AGENT: &str = "caldav-sync/1.0";
const RETRY_TICK: Duration = Duration::from_secs(60);
const CLEANUP_EVERY_TICKS: u32 = 60;

/// The exact payload shape delivered to webhook targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub mapping_id: String,
    pub direction: String,
    pub status: String,
    pub timestamp: String,
    pub inserted: i32,
    pub updated: i32,
    pub deleted: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
}

impl WebhookPayload {
    fn from_sync_log(
        mapping: &MappingModel,
        log: &SyncLogModel,
        include_events: bool,
        fallback_timestamp: DateTime<Utc>,
    ) -> Self {
        let timestamp = log
            .completed_at
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(fallback_timestamp)
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let events = include_events
            .then(|| {
                log.event_summaries
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            })
            .flatten();

        Self {
            mapping_id: mapping.id.to_string(),
            direction: log.direction.clone(),
            status: log.status.clone(),
            timestamp,
            inserted: log.inserted_count,
            updated: log.updated_count,
            deleted: log.deleted_count,
            events,
        }
    }
}

pub struct WebhookPipeline {
    http: Client,
    config: WebhookConfig,
    clock: Arc<dyn Clock>,
    sync_logs: SyncLogRepository,
    retries: WebhookRetryRepository,
}

impl WebhookPipeline {
    pub fn new(
        config: WebhookConfig,
        clock: Arc<dyn Clock>,
        sync_logs: SyncLogRepository,
        retries: WebhookRetryRepository,
    ) -> Self {
        Self {
            http: Client::new(),
            config,
            clock,
            sync_logs,
            retries,
        }
    }

    /// Deliver the result of a finished run. Returns true on success or when
    /// no webhook is configured; a failed delivery is queued for retry and
    /// reported as false.
    #[instrument(skip_all, fields(mapping_id = %mapping.id, sync_log_id = %log.id))]
    pub async fn send_sync_result(&self, mapping: &MappingModel, log: &SyncLogModel) -> bool {
        let Some(url) = mapping.webhook_url.as_deref().filter(|u| !u.is_empty()) else {
            return true;
        };

        let payload = WebhookPayload::from_sync_log(
            mapping,
            log,
            self.config.include_event_details,
            self.clock.now_utc(),
        );
        let payload_json = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "failed to serialize webhook payload");
                return false;
            }
        };

        let delivered = self.deliver(url, &payload_json).await;

        if let Err(e) = self.sync_logs.record_webhook(log.id, delivered.is_ok()).await {
            warn!(error = %e, "failed to record webhook status on sync log");
        }

        match delivered {
            Ok(()) => {
                let labels = vec![("outcome", "success".to_string())];
                counter!("webhook_deliveries_total", &labels).increment(1);
                true
            }
            Err(reason) => {
                let labels = vec![("outcome", "failure".to_string())];
                counter!("webhook_deliveries_total", &labels).increment(1);
                let first_delay = self
                    .config
                    .retry_delays_secs
                    .first()
                    .copied()
                    .unwrap_or(30);
                let next_retry_at = self.clock.now_utc() + chrono::Duration::seconds(first_delay);

                match self
                    .retries
                    .enqueue(
                        log.id,
                        url,
                        payload_json,
                        self.config.max_retries,
                        next_retry_at,
                        Some(reason.clone()),
                    )
                    .await
                {
                    Ok(_) => warn!(reason, %next_retry_at, "webhook delivery failed, retry queued"),
                    Err(e) => error!(error = %e, "failed to queue webhook retry"),
                }
                false
            }
        }
    }

    /// POST with the configured timeout; any 2xx counts as delivered.
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<(), String> {
        let started = std::time::Instant::now();

        let response = self
            .http
            .post(url)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(payload)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        let status = response.status();
        if status.is_success() {
            debug!(
                %status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "webhook delivered"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            ))
        }
    }

    /// Retry every due row once; called by the retry processor.
    pub async fn process_due_retries(&self) -> usize {
        let now = self.clock.now_utc();
        let due = match self.retries.due(now).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to load due webhook retries");
                return 0;
            }
        };

        let mut delivered = 0;
        for row in due {
            match self.deliver(&row.webhook_url, &row.payload).await {
                Ok(()) => {
                    if let Err(e) = self.retries.delete(row.id).await {
                        error!(error = %e, "failed to remove delivered webhook retry");
                    } else {
                        delivered += 1;
                        info!(retry_id = %row.id, attempt = row.attempt_count + 1, "webhook retry delivered");
                    }
                }
                Err(reason) => {
                    let next_attempt = row.attempt_count + 1;
                    let delay_index = (next_attempt as usize)
                        .min(self.config.retry_delays_secs.len().saturating_sub(1));
                    let delay = self
                        .config
                        .retry_delays_secs
                        .get(delay_index)
                        .copied()
                        .unwrap_or(1800);
                    let next_retry_at = now + chrono::Duration::seconds(delay);

                    if let Err(e) = self
                        .retries
                        .record_failure(&row, next_retry_at, reason.clone())
                        .await
                    {
                        error!(error = %e, "failed to update webhook retry row");
                        continue;
                    }

                    if next_attempt >= row.max_attempts {
                        warn!(
                            retry_id = %row.id,
                            attempts = next_attempt,
                            reason,
                            "webhook retry attempts exhausted"
                        );
                    } else {
                        warn!(
                            retry_id = %row.id,
                            attempt = next_attempt,
                            %next_retry_at,
                            reason,
                            "webhook retry failed, rescheduled"
                        );
                    }
                }
            }
        }

        delivered
    }

    pub async fn retry_stats(&self) -> Option<RetryStats> {
        match self.retries.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(error = %e, "failed to compute webhook retry stats");
                None
            }
        }
    }

    async fn cleanup(&self) {
        match self.retries.cleanup_failed(self.config.retention_days).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "garbage-collected exhausted webhook retries"),
            Err(e) => error!(error = %e, "webhook retry cleanup failed"),
        }
    }
}

/// Long-lived worker draining the retry queue once a minute.
pub struct WebhookRetryProcessor {
    pipeline: Arc<WebhookPipeline>,
}

impl WebhookRetryProcessor {
    pub fn new(pipeline: Arc<WebhookPipeline>) -> Self {
        Self { pipeline }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("webhook retry processor started");
        let mut ticks: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(RETRY_TICK) => {}
            }

            let processed = self.pipeline.process_due_retries().await;
            if processed > 0 {
                debug!(processed, "processed webhook retries");
            }

            ticks = ticks.wrapping_add(1);
            if ticks % CLEANUP_EVERY_TICKS == 0 {
                self.pipeline.cleanup().await;
            }
        }

        info!("webhook retry processor stopped");
    }
}
