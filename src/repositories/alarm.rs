//! Alarm repository for database operations
//!
//! Occurrence recording and operator transitions each run inside one
//! transaction that locks the alarm row before reading it. The
//! `idx_alarms_slot` unique index backs this up: two writers that both see an
//! empty slot cannot both insert, and the loser retries as a retrigger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{CaseStatement, Order, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{AlarmCommand, AlarmFilter, AlarmStore, StoreResult};
use crate::domain::{Alarm, AlarmSeverity, AlarmSlot, AlarmState, NewAlarm, Occurrence};
use crate::error::{MonitorError, is_unique_violation};
use crate::models::alarm::{self, Entity as AlarmEntity, SLOT_UNIQUE_INDEX};

/// Attempts before a slot insert race is reported to the caller.
const MAX_OCCURRENCE_ATTEMPTS: usize = 3;

/// Repository for alarm database operations
#[derive(Debug, Clone)]
pub struct AlarmRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl AlarmRepository {
    /// Creates a new AlarmRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn open_states() -> Vec<&'static str> {
        AlarmState::OPEN.iter().map(AlarmState::as_str).collect()
    }

    /// `CASE severity WHEN 'CRITICAL' THEN 0 ...`; severity is stored as text.
    fn severity_rank() -> SimpleExpr {
        AlarmSeverity::ALL
            .iter()
            .fold(CaseStatement::new(), |case, severity| {
                case.case(
                    alarm::Column::Severity.eq(severity.as_str()),
                    i32::from(severity.rank()),
                )
            })
            .finally(i32::from(u8::MAX))
            .into()
    }

    fn state_rank() -> SimpleExpr {
        AlarmState::OPEN
            .iter()
            .fold(CaseStatement::new(), |case, state| {
                case.case(
                    alarm::Column::State.eq(state.as_str()),
                    i32::from(state.rank()),
                )
            })
            .finally(i32::from(u8::MAX))
            .into()
    }

    async fn lock_slot(
        txn: &DatabaseTransaction,
        slot: &AlarmSlot,
    ) -> StoreResult<Option<Alarm>> {
        AlarmEntity::find()
            .filter(alarm::Column::TenantId.eq(slot.tenant_id))
            .filter(alarm::Column::WellId.eq(slot.well_id))
            .filter(alarm::Column::ConnectionId.eq(slot.connection_id))
            .filter(alarm::Column::TagName.eq(slot.tag_name.as_str()))
            .filter(alarm::Column::AlarmType.eq(slot.alarm_type.as_str()))
            .lock_exclusive()
            .one(txn)
            .await?
            .map(Alarm::try_from)
            .transpose()
    }

    /// One locked read-merge-write pass. `Ok(None)` means another writer
    /// inserted the slot first and the pass should be retried.
    async fn try_record_occurrence(
        &self,
        fired: &NewAlarm,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Occurrence>> {
        let txn = self.db.begin().await?;
        let existing = Self::lock_slot(&txn, &fired.slot).await?;
        let occurrence = Occurrence::merge(existing, fired, now)?;
        let active = alarm::ActiveModel::from(occurrence.alarm());

        match &occurrence {
            Occurrence::Created(_) => {
                match AlarmEntity::insert(active).exec_without_returning(&txn).await {
                    Ok(_) => {}
                    Err(err) if is_unique_violation(&err) => {
                        debug!(index = SLOT_UNIQUE_INDEX, "Alarm slot insert lost a race");
                        txn.rollback().await?;
                        return Ok(None);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Occurrence::Retriggered(_) => {
                active.update(&txn).await?;
            }
        }

        txn.commit().await?;
        Ok(Some(occurrence))
    }
}

#[async_trait]
impl AlarmStore for AlarmRepository {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Alarm>> {
        AlarmEntity::find_by_id(id)
            .filter(alarm::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .map(Alarm::try_from)
            .transpose()
    }

    async fn find_active(&self, filter: &AlarmFilter) -> StoreResult<Vec<Alarm>> {
        let mut query = AlarmEntity::find()
            .filter(alarm::Column::TenantId.eq(filter.tenant_id))
            .filter(alarm::Column::State.is_in(Self::open_states()));

        if let Some(well_id) = filter.well_id {
            query = query.filter(alarm::Column::WellId.eq(well_id));
        }
        if let Some(connection_id) = filter.connection_id {
            query = query.filter(alarm::Column::ConnectionId.eq(connection_id));
        }
        if let Some(severity) = filter.severity {
            query = query.filter(alarm::Column::Severity.eq(severity.as_str()));
        }

        query = query
            .order_by(Self::severity_rank(), Order::Asc)
            .order_by(Self::state_rank(), Order::Asc)
            .order_by_desc(alarm::Column::LastTriggeredAt)
            .order_by_asc(alarm::Column::Id);

        // SQLite rejects OFFSET without LIMIT.
        if filter.limit.is_some() || filter.offset > 0 {
            query = query
                .limit(filter.limit.unwrap_or(i64::MAX as u64))
                .offset(filter.offset);
        }

        query
            .all(&*self.db)
            .await?
            .into_iter()
            .map(Alarm::try_from)
            .collect()
    }

    async fn find_by_state(&self, tenant_id: Uuid, state: AlarmState) -> StoreResult<Vec<Alarm>> {
        AlarmEntity::find()
            .filter(alarm::Column::TenantId.eq(tenant_id))
            .filter(alarm::Column::State.eq(state.as_str()))
            .order_by_desc(alarm::Column::LastTriggeredAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(Alarm::try_from)
            .collect()
    }

    async fn find_existing_alarm(&self, slot: &AlarmSlot) -> StoreResult<Option<Alarm>> {
        AlarmEntity::find()
            .filter(alarm::Column::TenantId.eq(slot.tenant_id))
            .filter(alarm::Column::WellId.eq(slot.well_id))
            .filter(alarm::Column::ConnectionId.eq(slot.connection_id))
            .filter(alarm::Column::TagName.eq(slot.tag_name.as_str()))
            .filter(alarm::Column::AlarmType.eq(slot.alarm_type.as_str()))
            .filter(alarm::Column::State.is_in(Self::open_states()))
            .one(&*self.db)
            .await?
            .map(Alarm::try_from)
            .transpose()
    }

    #[instrument(skip_all, fields(slot = %fired.slot))]
    async fn record_occurrence(
        &self,
        fired: &NewAlarm,
        now: DateTime<Utc>,
    ) -> StoreResult<Occurrence> {
        for attempt in 1..=MAX_OCCURRENCE_ATTEMPTS {
            if let Some(occurrence) = self.try_record_occurrence(fired, now).await? {
                return Ok(occurrence);
            }
            counter!("alarm_slot_insert_conflicts_total").increment(1);
            debug!(attempt, "Alarm slot inserted concurrently; retrying as retrigger");
        }

        warn!(
            attempts = MAX_OCCURRENCE_ATTEMPTS,
            "Alarm slot kept conflicting; giving up"
        );
        Err(MonitorError::Store(sea_orm::DbErr::Custom(format!(
            "alarm slot {} still conflicting after {} attempts",
            fired.slot, MAX_OCCURRENCE_ATTEMPTS
        ))))
    }

    #[instrument(skip(self, now), fields(tenant_id = %tenant_id, alarm_id = %id))]
    async fn transition(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        command: AlarmCommand,
        now: DateTime<Utc>,
    ) -> StoreResult<Alarm> {
        let txn = self.db.begin().await?;
        let model = AlarmEntity::find_by_id(id)
            .filter(alarm::Column::TenantId.eq(tenant_id))
            .lock_exclusive()
            .one(&txn)
            .await?;
        let Some(model) = model else {
            txn.rollback().await?;
            return Err(MonitorError::not_found("alarm", id));
        };

        let mut alarm = Alarm::try_from(model)?;
        let applied = match command {
            AlarmCommand::Acknowledge { user_id } => alarm.acknowledge(user_id, now),
            AlarmCommand::Clear => alarm.clear(now),
        };
        if let Err(conflict) = applied {
            txn.rollback().await?;
            return Err(conflict.into());
        }

        alarm::ActiveModel::from(&alarm).update(&txn).await?;
        txn.commit().await?;
        Ok(alarm)
    }

    async fn save(&self, alarm: &Alarm) -> StoreResult<()> {
        let active = alarm::ActiveModel::from(alarm);

        let txn = self.db.begin().await?;
        let existing = AlarmEntity::find_by_id(alarm.id).one(&txn).await?;

        match existing {
            Some(row) if row.tenant_id != alarm.tenant_id() => {
                txn.rollback().await?;
                return Err(MonitorError::not_found("alarm", alarm.id));
            }
            Some(_) => {
                active.update(&txn).await?;
            }
            None => {
                AlarmEntity::insert(active)
                    .exec_without_returning(&txn)
                    .await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    async fn count_active_by_severity(
        &self,
        tenant_id: Uuid,
    ) -> StoreResult<Vec<(AlarmSeverity, u64)>> {
        let mut counts = Vec::with_capacity(AlarmSeverity::ALL.len());
        for severity in AlarmSeverity::ALL {
            let count = AlarmEntity::find()
                .filter(alarm::Column::TenantId.eq(tenant_id))
                .filter(alarm::Column::Severity.eq(severity.as_str()))
                .filter(alarm::Column::State.is_in(Self::open_states()))
                .count(&*self.db)
                .await?;
            counts.push((severity, count));
        }
        Ok(counts)
    }

    async fn count_active_for_well(&self, tenant_id: Uuid, well_id: Uuid) -> StoreResult<u64> {
        Ok(AlarmEntity::find()
            .filter(alarm::Column::TenantId.eq(tenant_id))
            .filter(alarm::Column::WellId.eq(well_id))
            .filter(alarm::Column::State.is_in(Self::open_states()))
            .count(&*self.db)
            .await?)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<()> {
        let result = AlarmEntity::delete_many()
            .filter(alarm::Column::Id.eq(id))
            .filter(alarm::Column::TenantId.eq(tenant_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MonitorError::not_found("alarm", id));
        }
        Ok(())
    }
}
