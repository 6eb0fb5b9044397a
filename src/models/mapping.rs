//! Mapping entity model
//!
//! Binds one CalDAV calendar to one Google calendar with the sync direction,
//! rolling window, interval and optional webhook target.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

use crate::event::SyncDirection;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub caldav_account_id: Uuid,

    pub caldav_calendar_id: String,
    pub caldav_calendar_name: String,

    pub google_calendar_id: String,
    pub google_calendar_name: String,

    /// caldav_to_google | google_to_caldav | bidirectional
    pub sync_direction: String,

    /// Days forward the rolling window covers (1-365)
    pub sync_window_days: i32,

    /// Sync cadence in minutes (1-1440)
    pub sync_interval_minutes: i32,

    pub webhook_url: Option<String>,

    pub enabled: bool,

    pub last_sync_at: Option<DateTimeWithTimeZone>,

    /// success | partial_failure | failure
    pub last_sync_status: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Typed sync direction; rows are written from the typed enum so an
    /// unknown value indicates outside tampering.
    pub fn direction(&self) -> Option<SyncDirection> {
        SyncDirection::parse(&self.sync_direction)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::caldav_account::Entity",
        from = "Column::CaldavAccountId",
        to = "super::caldav_account::Column::Id"
    )]
    CaldavAccount,
    #[sea_orm(has_many = "super::event_mapping::Entity")]
    EventMapping,
    #[sea_orm(has_many = "super::sync_log::Entity")]
    SyncLog,
}

impl Related<super::caldav_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CaldavAccount.def()
    }
}

impl Related<super::event_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EventMapping.def()
    }
}

impl Related<super::sync_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
