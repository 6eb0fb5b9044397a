//! Webhook retry entity model
//!
//! One pending delivery attempt with its serialized payload. Deleted on
//! success; retained as failed for observability once attempts are
//! exhausted, then garbage-collected.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_retries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub sync_log_id: Uuid,

    pub webhook_url: String,

    /// Serialized webhook payload, re-sent verbatim on retry
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub attempt_count: i32,
    pub max_attempts: i32,

    pub next_retry_at: DateTimeWithTimeZone,

    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_log::Entity",
        from = "Column::SyncLogId",
        to = "super::sync_log::Column::Id"
    )]
    SyncLog,
}

impl Related<super::sync_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
