//! Mapping repository

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::mapping::{self, Entity as Mapping};
use crate::repositories::RepoError;

#[derive(Clone)]
pub struct MappingRepository {
    db: Arc<DatabaseConnection>,
}

impl MappingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<mapping::Model>, RepoError> {
        Ok(Mapping::find_by_id(id).one(self.db.as_ref()).await?)
    }

    pub async fn require(&self, id: Uuid) -> Result<mapping::Model, RepoError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("mapping {id}")))
    }

    pub async fn list_all(&self) -> Result<Vec<mapping::Model>, RepoError> {
        Ok(Mapping::find()
            .order_by_asc(mapping::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn list_enabled(&self) -> Result<Vec<mapping::Model>, RepoError> {
        Ok(Mapping::find()
            .filter(mapping::Column::Enabled.eq(true))
            .order_by_asc(mapping::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }
}
