//! Sync log repository
//!
//! A log row is inserted as `running` when a run opens. Finalization writes
//! the terminal status together with the mapping's `last_sync_*` fields in a
//! single transaction.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::event::SyncDirection;
use crate::models::{
    mapping,
    sync_log::{self, Entity as SyncLog},
};
use crate::repositories::RepoError;

/// Terminal state written when a run finishes.
pub struct SyncLogFinalize<'a> {
    pub status: &'a str,
    pub inserted: i32,
    pub updated: i32,
    pub deleted: i32,
    pub errors: i32,
    pub error_message: Option<String>,
    pub event_summaries: &'a [String],
    pub change_summary: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

#[derive(Clone)]
pub struct SyncLogRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<sync_log::Model>, RepoError> {
        Ok(SyncLog::find_by_id(id).one(self.db.as_ref()).await?)
    }

    /// Open a `running` log row for a new run.
    pub async fn open_running(
        &self,
        mapping_id: Uuid,
        direction: SyncDirection,
        started_at: DateTime<Utc>,
    ) -> Result<sync_log::Model, RepoError> {
        let model = sync_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            mapping_id: Set(mapping_id),
            direction: Set(direction.as_str().to_string()),
            status: Set("running".to_string()),
            inserted_count: Set(0),
            updated_count: Set(0),
            deleted_count: Set(0),
            error_count: Set(0),
            error_message: Set(None),
            event_summaries: Set(None),
            change_summary: Set(None),
            webhook_sent: Set(false),
            webhook_status: Set(None),
            started_at: Set(started_at.into()),
            completed_at: Set(None),
            duration_seconds: Set(None),
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Finalize the log and stamp the mapping's last-sync fields in one
    /// transaction.
    pub async fn finalize(
        &self,
        log_id: Uuid,
        mapping_id: Uuid,
        outcome: SyncLogFinalize<'_>,
    ) -> Result<(), RepoError> {
        let txn = self.db.begin().await?;

        let summaries = if outcome.event_summaries.is_empty() {
            None
        } else {
            Some(serde_json::json!(outcome.event_summaries))
        };

        let log = sync_log::ActiveModel {
            id: Set(log_id),
            status: Set(outcome.status.to_string()),
            inserted_count: Set(outcome.inserted),
            updated_count: Set(outcome.updated),
            deleted_count: Set(outcome.deleted),
            error_count: Set(outcome.errors),
            error_message: Set(outcome.error_message),
            event_summaries: Set(summaries),
            change_summary: Set(outcome.change_summary),
            completed_at: Set(Some(outcome.completed_at.into())),
            duration_seconds: Set(Some(outcome.duration_seconds)),
            ..Default::default()
        };
        log.update(&txn).await?;

        let mapping = mapping::ActiveModel {
            id: Set(mapping_id),
            last_sync_at: Set(Some(outcome.completed_at.into())),
            last_sync_status: Set(Some(outcome.status.to_string())),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        mapping.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Record the outcome of the first webhook delivery attempt.
    pub async fn record_webhook(&self, log_id: Uuid, delivered: bool) -> Result<(), RepoError> {
        let model = sync_log::ActiveModel {
            id: Set(log_id),
            webhook_sent: Set(true),
            webhook_status: Set(Some(
                if delivered { "success" } else { "failure" }.to_string(),
            )),
            ..Default::default()
        };
        model.update(self.db.as_ref()).await?;
        Ok(())
    }

    pub async fn list_recent(
        &self,
        mapping_id: Uuid,
        limit: u64,
    ) -> Result<Vec<sync_log::Model>, RepoError> {
        Ok(SyncLog::find()
            .filter(sync_log::Column::MappingId.eq(mapping_id))
            .order_by_desc(sync_log::Column::StartedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }

    /// Retention sweep: drop terminal log rows older than the cutoff.
    pub async fn delete_older_than(&self, retention_days: i64) -> Result<u64, RepoError> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        let result = SyncLog::delete_many()
            .filter(sync_log::Column::StartedAt.lt(cutoff))
            .filter(sync_log::Column::Status.ne("running"))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }
}
