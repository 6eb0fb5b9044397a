//! Sync log entity model
//!
//! Audit record of one sync run. Inserted as `running` when the run opens
//! and finalized with counters, errors and timing in one update.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub mapping_id: Uuid,

    pub direction: String,

    /// running | success | partial_failure | failure
    pub status: String,

    pub inserted_count: i32,
    pub updated_count: i32,
    pub deleted_count: i32,
    pub error_count: i32,

    /// Concatenated per-change error strings
    pub error_message: Option<String>,

    /// Titles of changed events, stored as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub event_summaries: Option<JsonValue>,

    pub change_summary: Option<String>,

    pub webhook_sent: bool,

    /// success | failure
    pub webhook_status: Option<String>,

    pub started_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub duration_seconds: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mapping::Entity",
        from = "Column::MappingId",
        to = "super::mapping::Column::Id"
    )]
    Mapping,
    #[sea_orm(has_many = "super::webhook_retry::Entity")]
    WebhookRetry,
}

impl Related<super::mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mapping.def()
    }
}

impl Related<super::webhook_retry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WebhookRetry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
