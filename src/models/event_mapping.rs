//! Event mapping entity model
//!
//! Persisted correspondence between one CalDAV event and one Google event
//! within a mapping. This row is the only source of truth tying the two
//! sides together; losing it forces a resync by content.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "event_mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub mapping_id: Uuid,

    /// Sync key of the tracked event: the iCalendar UID, suffixed with
    /// `#<instance-id>` for overridden instances of a series. Unique per
    /// mapping.
    pub caldav_uid: String,

    pub google_event_id: Option<String>,

    pub last_caldav_modified: Option<DateTimeWithTimeZone>,
    pub last_google_updated: Option<DateTimeWithTimeZone>,

    /// Direction of the last successful apply for this event
    pub last_sync_direction: Option<String>,

    /// Content hash of the side that was applied last
    pub content_hash: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mapping::Entity",
        from = "Column::MappingId",
        to = "super::mapping::Column::Id"
    )]
    Mapping,
}

impl Related<super::mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mapping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
