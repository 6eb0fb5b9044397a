//! CalDAV account entity model
//!
//! Credentials and connection settings for one CalDAV endpoint. The password
//! column holds AES-256-GCM ciphertext bound to the account row; plaintext is
//! only produced inside the account repository.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "caldav_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Display name, unique across accounts
    pub name: String,

    pub username: String,

    /// Encrypted password ciphertext
    pub password_ciphertext: Vec<u8>,

    /// Base URL all calendar paths resolve against
    pub base_url: String,

    /// Whether TLS certificates are verified for this endpoint
    pub verify_tls: bool,

    pub enabled: bool,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::mapping::Entity")]
    Mapping,
}

impl Related<super::mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mapping.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
