//! Reading repository for database operations
//!
//! Append-only storage for classified readings. Nothing here updates a row;
//! the only destructive operation is the retention delete.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::instrument;
use uuid::Uuid;

use super::{ReadingFilter, ReadingStore, StoreResult};
use crate::domain::Reading;
use crate::models::reading::{self, Entity as ReadingEntity};
use crate::models::to_db_time;

/// Rows per INSERT statement when writing a batch.
const INSERT_CHUNK_SIZE: usize = 500;

/// Repository for reading database operations
#[derive(Debug, Clone)]
pub struct ReadingRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ReadingRepository {
    /// Creates a new ReadingRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReadingStore for ReadingRepository {
    async fn create(&self, reading: &Reading) -> StoreResult<()> {
        ReadingEntity::insert(reading::ActiveModel::try_from(reading)?)
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = readings.len()))]
    async fn create_batch(&self, readings: &[Reading]) -> StoreResult<u64> {
        let mut inserted = 0;
        for chunk in readings.chunks(INSERT_CHUNK_SIZE) {
            let models = chunk
                .iter()
                .map(reading::ActiveModel::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            inserted += ReadingEntity::insert_many(models)
                .exec_without_returning(&*self.db)
                .await?;
        }
        Ok(inserted)
    }

    async fn find_with_filters(&self, filter: &ReadingFilter) -> StoreResult<Vec<Reading>> {
        let mut query =
            ReadingEntity::find().filter(reading::Column::TenantId.eq(filter.tenant_id));

        if let Some(well_id) = filter.well_id {
            query = query.filter(reading::Column::WellId.eq(well_id));
        }
        if let Some(connection_id) = filter.connection_id {
            query = query.filter(reading::Column::ConnectionId.eq(connection_id));
        }
        if let Some(tag_name) = &filter.tag_name {
            query = query.filter(reading::Column::TagName.eq(tag_name.as_str()));
        }
        if let Some(start) = filter.start_time {
            query = query.filter(reading::Column::Timestamp.gte(to_db_time(start)));
        }
        if let Some(end) = filter.end_time {
            query = query.filter(reading::Column::Timestamp.lte(to_db_time(end)));
        }

        query
            .order_by_desc(reading::Column::Timestamp)
            .order_by_desc(reading::Column::Id)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(Reading::try_from)
            .collect()
    }

    async fn find_latest_by_tag(
        &self,
        tenant_id: Uuid,
        well_id: Uuid,
        tag_name: &str,
    ) -> StoreResult<Option<Reading>> {
        ReadingEntity::find()
            .filter(reading::Column::TenantId.eq(tenant_id))
            .filter(reading::Column::WellId.eq(well_id))
            .filter(reading::Column::TagName.eq(tag_name))
            .order_by_desc(reading::Column::Timestamp)
            .order_by_desc(reading::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .map(Reading::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = ReadingEntity::delete_many()
            .filter(reading::Column::Timestamp.lt(to_db_time(cutoff)))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
