//! Webhook retry repository

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::webhook_retry::{self, Entity as WebhookRetry};
use crate::repositories::RepoError;

/// Observability snapshot over the retry queue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetryStats {
    pub total: u64,
    pub pending: u64,
    pub failed: u64,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct WebhookRetryRepository {
    db: Arc<DatabaseConnection>,
}

impl WebhookRetryRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Queue a failed delivery for retry.
    pub async fn enqueue(
        &self,
        sync_log_id: Uuid,
        webhook_url: &str,
        payload: serde_json::Value,
        max_attempts: i32,
        next_retry_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> Result<webhook_retry::Model, RepoError> {
        let now = Utc::now();
        let model = webhook_retry::ActiveModel {
            id: Set(Uuid::new_v4()),
            sync_log_id: Set(sync_log_id),
            webhook_url: Set(webhook_url.to_string()),
            payload: Set(payload),
            attempt_count: Set(0),
            max_attempts: Set(max_attempts),
            next_retry_at: Set(next_retry_at.into()),
            last_error: Set(last_error),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Rows due for another attempt.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<webhook_retry::Model>, RepoError> {
        Ok(WebhookRetry::find()
            .filter(webhook_retry::Column::NextRetryAt.lte(now))
            .filter(
                Expr::col(webhook_retry::Column::AttemptCount)
                    .lt(Expr::col(webhook_retry::Column::MaxAttempts)),
            )
            .order_by_asc(webhook_retry::Column::NextRetryAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Delivery succeeded: drop the row.
    pub async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        WebhookRetry::delete_by_id(id).exec(self.db.as_ref()).await?;
        Ok(())
    }

    /// Delivery failed again: bump the attempt counter and reschedule.
    /// Exhausted rows keep their last error and stop being selected as due.
    pub async fn record_failure(
        &self,
        row: &webhook_retry::Model,
        next_retry_at: DateTime<Utc>,
        error: String,
    ) -> Result<(), RepoError> {
        let model = webhook_retry::ActiveModel {
            id: Set(row.id),
            attempt_count: Set(row.attempt_count + 1),
            next_retry_at: Set(next_retry_at.into()),
            last_error: Set(Some(error)),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        model.update(self.db.as_ref()).await?;
        Ok(())
    }

    /// Garbage-collect exhausted rows past the retention window.
    pub async fn cleanup_failed(&self, retention_days: i64) -> Result<u64, RepoError> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        let result = WebhookRetry::delete_many()
            .filter(webhook_retry::Column::CreatedAt.lt(cutoff))
            .filter(
                Expr::col(webhook_retry::Column::AttemptCount)
                    .gte(Expr::col(webhook_retry::Column::MaxAttempts)),
            )
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    pub async fn stats(&self) -> Result<RetryStats, RepoError> {
        let total = WebhookRetry::find().count(self.db.as_ref()).await?;
        let pending = WebhookRetry::find()
            .filter(
                Expr::col(webhook_retry::Column::AttemptCount)
                    .lt(Expr::col(webhook_retry::Column::MaxAttempts)),
            )
            .count(self.db.as_ref())
            .await?;
        let next = WebhookRetry::find()
            .filter(
                Expr::col(webhook_retry::Column::AttemptCount)
                    .lt(Expr::col(webhook_retry::Column::MaxAttempts)),
            )
            .order_by_asc(webhook_retry::Column::NextRetryAt)
            .one(self.db.as_ref())
            .await?;

        Ok(RetryStats {
            total,
            pending,
            failed: total.saturating_sub(pending),
            next_retry_at: next.map(|row| row.next_retry_at.with_timezone(&Utc)),
        })
    }
}
