//! Event mapping repository
//!
//! Upserts keyed on `(mapping_id, caldav_uid)` run in their own short
//! transaction, one per applied change.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::event::SyncDirection;
use crate::models::event_mapping::{self, Entity as EventMapping};
use crate::repositories::RepoError;

/// Field bundle for one upsert, recorded after a successful adapter call.
pub struct EventMappingUpdate<'a> {
    pub mapping_id: Uuid,
    pub caldav_uid: &'a str,
    pub google_event_id: Option<&'a str>,
    pub last_caldav_modified: Option<DateTime<Utc>>,
    pub last_google_updated: Option<DateTime<Utc>>,
    pub direction: SyncDirection,
    pub content_hash: &'a str,
}

#[derive(Clone)]
pub struct EventMappingRepository {
    db: Arc<DatabaseConnection>,
}

impl EventMappingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list_for_mapping(
        &self,
        mapping_id: Uuid,
    ) -> Result<Vec<event_mapping::Model>, RepoError> {
        Ok(EventMapping::find()
            .filter(event_mapping::Column::MappingId.eq(mapping_id))
            .all(self.db.as_ref())
            .await?)
    }

    /// Create or update the tracked row for one event.
    pub async fn upsert(&self, update: EventMappingUpdate<'_>) -> Result<(), RepoError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let existing = EventMapping::find()
            .filter(event_mapping::Column::MappingId.eq(update.mapping_id))
            .filter(event_mapping::Column::CaldavUid.eq(update.caldav_uid))
            .one(&txn)
            .await?;

        match existing {
            Some(row) => {
                let model = event_mapping::ActiveModel {
                    id: Set(row.id),
                    google_event_id: Set(update.google_event_id.map(str::to_string)),
                    last_caldav_modified: Set(update.last_caldav_modified.map(Into::into)),
                    last_google_updated: Set(update.last_google_updated.map(Into::into)),
                    last_sync_direction: Set(Some(update.direction.as_str().to_string())),
                    content_hash: Set(Some(update.content_hash.to_string())),
                    updated_at: Set(now.into()),
                    ..Default::default()
                };
                model.update(&txn).await?;
            }
            None => {
                let model = event_mapping::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    mapping_id: Set(update.mapping_id),
                    caldav_uid: Set(update.caldav_uid.to_string()),
                    google_event_id: Set(update.google_event_id.map(str::to_string)),
                    last_caldav_modified: Set(update.last_caldav_modified.map(Into::into)),
                    last_google_updated: Set(update.last_google_updated.map(Into::into)),
                    last_sync_direction: Set(Some(update.direction.as_str().to_string())),
                    content_hash: Set(Some(update.content_hash.to_string())),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                model.insert(&txn).await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        EventMapping::delete_by_id(id).exec(self.db.as_ref()).await?;
        Ok(())
    }
}
